//! Single-line replay tests
//!
//! Tests the interleaved pass: handlers, phases, anomalies, and stepping.

use std::sync::Arc;

use bbreplay_engine::{
    AnomalyKind, MessageKind, ObservedEvent, RecordingObserver, RunPhase, Runner, RunnerConfig,
    VecSource,
};
use bbreplay_foundation::{Address, SyncKind, SyncObjectId, ThreadId, TraceEvent, TraceRecord};

fn t(id: u32) -> ThreadId {
    ThreadId::new(id)
}

fn rec(thread: u32, ts: u64, event: TraceEvent) -> TraceRecord {
    TraceRecord::new(t(thread), ts, event)
}

fn bb(thread: u32, address: u64) -> TraceRecord {
    rec(
        thread,
        0,
        TraceEvent::BasicBlockStart {
            address: Address::new(address),
        },
    )
}

fn call(thread: u32, name: &str) -> TraceRecord {
    rec(
        thread,
        0,
        TraceEvent::LibraryCall {
            name: name.to_string(),
            args: vec![],
        },
    )
}

fn ret(thread: u32, name: &str) -> TraceRecord {
    rec(
        thread,
        0,
        TraceEvent::LibraryReturn {
            name: name.to_string(),
            retval: 1,
        },
    )
}

fn sync(thread: u32, object: u64, seq: u32) -> TraceRecord {
    rec(
        thread,
        0,
        TraceEvent::Sync {
            object: SyncObjectId::new(object),
            kind: SyncKind::CriticalSection,
            seq,
            ts: 0,
        },
    )
}

fn run(records: Vec<TraceRecord>) -> Runner {
    let mut runner = Runner::new(RunnerConfig::new().record_crossings());
    runner.open(VecSource::new(records));
    runner.run(RunPhase::None).unwrap();
    runner
}

// =============================================================================
// Handlers
// =============================================================================

#[test]
fn two_thread_turns_in_order() {
    let runner = run(vec![
        sync(1, 5, 0),
        bb(1, 0x10),
        bb(1, 0x20),
        bb(1, 0x30),
        sync(2, 5, 1),
        bb(2, 0x40),
        bb(2, 0x50),
    ]);

    assert_eq!(runner.basic_block_count(t(1)), 3);
    assert_eq!(runner.basic_block_count(t(2)), 2);
    assert_eq!(
        runner.expected_sequence(SyncKind::CriticalSection, SyncObjectId::new(5)),
        2
    );
    assert_eq!(runner.summary().anomalies.total, 0);
}

#[test]
fn balanced_calls_leave_empty_stacks() {
    let runner = run(vec![
        call(1, "CreateFileW"),
        call(1, "NtCreateFile"),
        ret(1, "NtCreateFile"),
        ret(1, "CreateFileW"),
        rec(1, 9, TraceEvent::ThreadFinished),
    ]);

    let summary = runner.finished_summary(t(1)).unwrap();
    assert!(summary.is_consistent());
    assert_eq!(summary.calls, 2);
    assert_eq!(runner.anomaly_count(AnomalyKind::StackMismatch), 0);
    assert_eq!(runner.anomaly_count(AnomalyKind::DanglingFrames), 0);
}

#[test]
fn each_unmatched_return_is_one_mismatch() {
    let runner = run(vec![
        call(1, "ReadFile"),
        ret(1, "WriteFile"),
        ret(1, "CloseHandle"),
        call(1, "Sleep"),
        ret(1, "Sleep"),
    ]);

    assert_eq!(runner.anomaly_count(AnomalyKind::StackMismatch), 2);
    assert!(runner.thread(t(1)).unwrap().call_stack().is_empty());
}

#[test]
fn dangling_frames_are_reported_at_finish() {
    let runner = run(vec![
        call(1, "WaitForSingleObject"),
        rec(1, 1, TraceEvent::ThreadFinished),
    ]);

    assert_eq!(runner.anomaly_count(AnomalyKind::DanglingFrames), 1);
    assert_eq!(runner.finished_summary(t(1)).unwrap().dangling_frames, 1);
}

#[test]
fn args_and_strings_attach_to_top_frame() {
    let runner = run(vec![
        rec(1, 0, TraceEvent::Args { values: vec![1, 2] }),
        call(1, "CreateFileW"),
        rec(1, 0, TraceEvent::Args { values: vec![0x80] }),
        rec(
            1,
            0,
            TraceEvent::StringData {
                value: "C:\\log.txt".to_string(),
            },
        ),
    ]);

    let ctx = runner.thread(t(1)).unwrap();
    let frame = &ctx.call_stack()[0];
    assert_eq!(frame.args, vec![0x80]);
    assert_eq!(frame.strings, vec!["C:\\log.txt".to_string()]);
}

#[test]
fn memory_accounting() {
    let runner = run(vec![
        rec(
            1,
            0,
            TraceEvent::MemoryAccess {
                address: Address::new(0x1000),
                size: 4,
                is_write: false,
            },
        ),
        rec(
            1,
            0,
            TraceEvent::MemoryAccess {
                address: Address::new(0x1000),
                size: 8,
                is_write: true,
            },
        ),
        rec(
            1,
            0,
            TraceEvent::MemoryLoop {
                address: Address::new(0x2000),
                size: 1,
                iterations: 64,
            },
        ),
    ]);

    let memory = *runner.thread(t(1)).unwrap().memory();
    assert_eq!(memory.reads, 1);
    assert_eq!(memory.bytes_read, 4);
    assert_eq!(memory.writes, 1);
    assert_eq!(memory.bytes_written, 8);
    assert_eq!(memory.loop_iterations, 64);
}

#[test]
fn symbols_overwrite() {
    let symbol = |name: &str| {
        rec(
            1,
            0,
            TraceEvent::Symbol {
                address: Address::new(0x401000),
                name: name.to_string(),
            },
        )
    };
    let runner = run(vec![symbol("sub_401000"), symbol("main"), symbol("main")]);

    assert_eq!(runner.symbol(Address::new(0x401000)).as_deref(), Some("main"));
    assert_eq!(runner.symbols().len(), 1);
}

// =============================================================================
// Sequences
// =============================================================================

#[test]
fn stale_sequence_is_counted_and_ignored() {
    let runner = run(vec![sync(1, 5, 0), sync(2, 5, 0), bb(2, 0x10)]);

    assert_eq!(runner.anomaly_count(AnomalyKind::StaleSequence), 1);
    assert_eq!(
        runner.expected_sequence(SyncKind::CriticalSection, SyncObjectId::new(5)),
        1
    );
    assert_eq!(runner.basic_block_count(t(2)), 1);
}

#[test]
fn skipped_turn_never_blocks_a_single_line() {
    let runner = run(vec![sync(1, 5, 3), bb(1, 0x10)]);

    assert_eq!(runner.anomaly_count(AnomalyKind::SequenceAhead), 1);
    assert_eq!(runner.basic_block_count(t(1)), 1);
    assert_eq!(
        runner.expected_sequence(SyncKind::CriticalSection, SyncObjectId::new(5)),
        4
    );
}

#[test]
fn crossings_are_journaled_in_trace_order() {
    let runner = run(vec![sync(2, 7, 0), sync(1, 7, 1), sync(2, 7, 2)]);

    let order: Vec<_> = runner.crossings().iter().map(|c| (c.thread, c.seq)).collect();
    assert_eq!(order, vec![(t(2), 0), (t(1), 1), (t(2), 2)]);
}

// =============================================================================
// Phases
// =============================================================================

#[test]
fn phases_split_start_and_finish() {
    let observer = Arc::new(RecordingObserver::new("phases"));
    let mut runner = Runner::new(RunnerConfig::default());
    runner.add_observer(Arc::clone(&observer));

    runner.open(VecSource::new(vec![bb(1, 0x10)]));
    runner.run(RunPhase::Pre).unwrap();
    assert_eq!(observer.events(), vec![ObservedEvent::RunStart]);

    runner.open(VecSource::new(vec![bb(1, 0x20)]));
    runner.run(RunPhase::Post).unwrap();
    assert_eq!(
        observer.events(),
        vec![ObservedEvent::RunStart, ObservedEvent::RunFinish]
    );
    assert_eq!(runner.basic_block_count(t(1)), 2);
}

#[test]
fn execute_uses_configured_phase() {
    let observer = Arc::new(RecordingObserver::new("pre"));
    let mut runner = Runner::new(RunnerConfig::new().with_phase(RunPhase::Pre));
    runner.add_observer(Arc::clone(&observer));
    runner.open(VecSource::new(vec![bb(1, 0x10)]));
    runner.execute().unwrap();

    assert_eq!(observer.events(), vec![ObservedEvent::RunStart]);
}

// =============================================================================
// Threads and messages
// =============================================================================

#[test]
fn reused_thread_ids_accumulate() {
    let runner = run(vec![
        bb(4, 0x10),
        rec(4, 1, TraceEvent::ThreadFinished),
        rec(
            1,
            2,
            TraceEvent::CreateThread {
                new_thread: t(4),
                suspended: false,
            },
        ),
        bb(4, 0x20),
        bb(4, 0x30),
        rec(4, 3, TraceEvent::ThreadFinished),
    ]);

    let summary = runner.finished_summary(t(4)).unwrap();
    assert_eq!(summary.basic_block_count, 3);
    assert_eq!(summary.lifetimes, 2);
    assert_eq!(runner.basic_block_count(t(4)), 3);
}

#[test]
fn posted_stop_halts_before_remaining_records() {
    let mut runner = Runner::new(RunnerConfig::default());
    runner.open(VecSource::new(vec![bb(1, 0x10), bb(1, 0x20), bb(1, 0x30)]));
    assert!(runner.step().unwrap());

    runner.post_message(t(1), MessageKind::RequestStop, "");
    runner.run(RunPhase::None).unwrap();

    assert!(runner.is_stop_requested());
    assert_eq!(runner.basic_block_count(t(1)), 1);
    assert!(runner.live_threads().is_empty());
}

#[test]
fn finish_message_for_unknown_thread_is_an_anomaly() {
    let mut runner = Runner::new(RunnerConfig::default());
    runner.post_message(t(42), MessageKind::ThreadFinished, "");
    runner.open(VecSource::new(vec![]));
    runner.run(RunPhase::None).unwrap();

    let anomalies = runner.anomalies();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].thread, t(42));
    assert_eq!(anomalies[0].anomaly.kind(), AnomalyKind::UnknownThread);
}

#[test]
fn config_accessors() {
    let runner = Runner::new(RunnerConfig::new().with_executable("C:\\tools\\app.exe"));
    assert_eq!(runner.executable(), "C:\\tools\\app.exe");
    assert_eq!(runner.prefix(), "app");
    assert!(!runner.is_open());
}
