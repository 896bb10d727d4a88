//! Checkpoint tests
//!
//! Tests that a run split by a saved and restored checkpoint matches an
//! uninterrupted run.

use std::sync::Arc;

use bbreplay_engine::{
    AnomalyKind, ObservedEvent, RecordingObserver, RunPhase, Runner, RunnerConfig, VecSource,
};
use bbreplay_foundation::{Address, SyncKind, SyncObjectId, ThreadId, TraceEvent, TraceRecord};
use bbreplay_runtime::{
    restore_state, restore_symbols, save_state, save_symbols, state_to_bytes, symbols_to_bytes,
};

fn t(id: u32) -> ThreadId {
    ThreadId::new(id)
}

fn rec(thread: u32, ts: u64, event: TraceEvent) -> TraceRecord {
    TraceRecord::new(t(thread), ts, event)
}

/// Two threads taking turns on a critical section, with calls and symbols.
fn trace() -> Vec<TraceRecord> {
    let mut records = Vec::new();
    for round in 0..4u32 {
        let thread = round % 2 + 1;
        let ts = u64::from(round) * 10;
        let address = Address::new(0x40_1000 + u64::from(round) * 0x10);
        records.push(rec(
            thread,
            ts,
            TraceEvent::Sync {
                object: SyncObjectId::new(0x77),
                kind: SyncKind::CriticalSection,
                seq: round,
                ts,
            },
        ));
        records.push(rec(
            thread,
            ts + 1,
            TraceEvent::Symbol {
                address,
                name: format!("round_{round}"),
            },
        ));
        records.push(rec(thread, ts + 2, TraceEvent::BasicBlockStart { address }));
        records.push(rec(
            thread,
            ts + 3,
            TraceEvent::LibraryCall {
                name: "EnterCriticalSection".to_string(),
                args: vec![0x77],
            },
        ));
        records.push(rec(
            thread,
            ts + 4,
            TraceEvent::LibraryReturn {
                name: "EnterCriticalSection".to_string(),
                retval: 0,
            },
        ));
    }
    // an unmatched return so the anomaly log carries over too
    records.push(rec(
        1,
        50,
        TraceEvent::LibraryReturn {
            name: "LeaveCriticalSection".to_string(),
            retval: 0,
        },
    ));
    records.push(rec(1, 51, TraceEvent::ThreadFinished));
    records.push(rec(2, 52, TraceEvent::ThreadFinished));
    records
}

fn config() -> RunnerConfig {
    RunnerConfig::new().record_crossings()
}

fn full_run() -> Runner {
    let mut runner = Runner::new(config());
    runner.open(VecSource::new(trace()));
    runner.run(RunPhase::None).unwrap();
    runner
}

/// Runs the first `split` records, checkpoints, and continues in a fresh runner.
fn split_run(split: usize) -> (Runner, Arc<RecordingObserver>, Arc<RecordingObserver>) {
    let records = trace();

    let before = Arc::new(RecordingObserver::new("before"));
    let mut first = Runner::new(config());
    first.add_observer(Arc::clone(&before));
    first.open(VecSource::new(records[..split].to_vec()));
    first.run(RunPhase::Pre).unwrap();

    let mut state = Vec::new();
    let mut symbols = Vec::new();
    save_state(&first, &mut state).unwrap();
    save_symbols(&first, &mut symbols).unwrap();

    let after = Arc::new(RecordingObserver::new("after"));
    let mut second = Runner::new(config());
    second.add_observer(Arc::clone(&after));
    restore_state(&second, &mut &state[..]).unwrap();
    restore_symbols(&second, &mut &symbols[..]).unwrap();
    second.open(VecSource::new(records[split..].to_vec()));
    second.run(RunPhase::Post).unwrap();

    (second, before, after)
}

#[test]
fn split_run_matches_uninterrupted_run() {
    let expected = full_run();

    for split in [0, 3, 7, 12, trace().len()] {
        let (resumed, _, _) = split_run(split);
        assert_eq!(resumed.summary(), expected.summary(), "split at {split}");
        assert_eq!(resumed.symbols(), expected.symbols(), "split at {split}");
        assert_eq!(resumed.crossings(), expected.crossings(), "split at {split}");
    }
}

#[test]
fn split_run_keeps_ledger_position() {
    let records = trace();
    let mut first = Runner::new(config());
    first.open(VecSource::new(records[..10].to_vec()));
    first.run(RunPhase::Pre).unwrap();

    let resumed = Runner::new(config());
    resumed.restore_snapshot(first.snapshot());

    let object = SyncObjectId::new(0x77);
    assert_eq!(resumed.expected_sequence(SyncKind::CriticalSection, object), 2);
    assert_eq!(resumed.live_threads(), vec![t(1), t(2)]);
    assert_eq!(resumed.basic_block_count(t(1)), 1);
}

#[test]
fn phases_split_observer_notifications() {
    let (resumed, before, after) = split_run(10);

    assert_eq!(before.events(), vec![ObservedEvent::RunStart]);

    let events = after.events();
    assert!(!events.contains(&ObservedEvent::RunStart));
    assert_eq!(events.last(), Some(&ObservedEvent::RunFinish));
    assert_eq!(after.finish_count(t(1)), 1);
    assert_eq!(after.finish_count(t(2)), 1);
    assert_eq!(resumed.anomaly_count(AnomalyKind::StackMismatch), 1);
}

#[test]
fn failed_restore_leaves_runner_unchanged() {
    let source = full_run();
    let state = state_to_bytes(&source.snapshot()).unwrap();
    let symbols = symbols_to_bytes(&source.symbols()).unwrap();

    let mut target = Runner::new(config());
    target.open(VecSource::new(trace()[..5].to_vec()));
    target.run(RunPhase::Pre).unwrap();
    let snapshot = target.snapshot();
    let table = target.symbols();

    assert!(restore_state(&target, &mut &state[..state.len() / 2]).is_err());
    assert!(restore_state(&target, &mut &symbols[..]).is_err());
    assert!(restore_symbols(&target, &mut &state[..]).is_err());

    assert_eq!(target.snapshot(), snapshot);
    assert_eq!(target.symbols(), table);
}

#[test]
fn restoring_state_keeps_symbols() {
    let source = full_run();

    let target = Runner::new(config());
    restore_state(&target, &mut &state_to_bytes(&source.snapshot()).unwrap()[..]).unwrap();
    assert!(target.symbols().is_empty());
    assert_eq!(target.summary(), source.summary());

    restore_symbols(&target, &mut &symbols_to_bytes(&source.symbols()).unwrap()[..]).unwrap();
    assert_eq!(target.symbol(Address::new(0x40_1000)).as_deref(), Some("round_0"));
}
