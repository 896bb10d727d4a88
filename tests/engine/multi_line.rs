//! Multi-line replay tests
//!
//! Tests one-line-per-thread replay: gate ordering, barriers, stop, and stalls.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bbreplay_engine::{
    AnomalyKind, ChannelSource, MessageKind, RecordingObserver, Runner, RunnerConfig, VecSource,
    WaitState,
};
use bbreplay_foundation::{Address, SyncKind, SyncObjectId, ThreadId, TraceEvent, TraceRecord};

fn t(id: u32) -> ThreadId {
    ThreadId::new(id)
}

fn bb(thread: u32) -> TraceRecord {
    TraceRecord::new(
        t(thread),
        0,
        TraceEvent::BasicBlockStart {
            address: Address::new(0x1000 + u64::from(thread)),
        },
    )
}

fn sync(thread: u32, kind: SyncKind, object: u64, seq: u32) -> TraceRecord {
    TraceRecord::new(
        t(thread),
        u64::from(seq) * 10,
        TraceEvent::Sync {
            object: SyncObjectId::new(object),
            kind,
            seq,
            ts: u64::from(seq) * 10,
        },
    )
}

fn multi_line(records: Vec<TraceRecord>) -> (Runner, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::new("lines"));
    let mut runner = Runner::new(RunnerConfig::new().multi_line().record_crossings());
    runner.add_observer(Arc::clone(&observer));
    runner.open(VecSource::new(records));
    runner.execute().unwrap();
    (runner, observer)
}

// =============================================================================
// Gate ordering
// =============================================================================

#[test]
fn two_thread_scenario() {
    let (runner, _) = multi_line(vec![
        sync(1, SyncKind::Mutex, 5, 0),
        bb(1),
        bb(1),
        bb(1),
        sync(2, SyncKind::Mutex, 5, 1),
        bb(2),
        bb(2),
    ]);

    assert_eq!(runner.basic_block_count(t(1)), 3);
    assert_eq!(runner.basic_block_count(t(2)), 2);
    assert_eq!(runner.expected_sequence(SyncKind::Mutex, SyncObjectId::new(5)), 2);
}

#[test]
fn crossing_order_follows_sequence_not_stream() {
    // thread 3 is routed first but holds the last turn
    let (runner, _) = multi_line(vec![
        sync(3, SyncKind::CriticalSection, 9, 2),
        bb(3),
        sync(2, SyncKind::CriticalSection, 9, 1),
        sync(1, SyncKind::CriticalSection, 9, 0),
    ]);

    let order: Vec<_> = runner.crossings().iter().map(|c| (c.thread, c.seq)).collect();
    assert_eq!(order, vec![(t(1), 0), (t(2), 1), (t(3), 2)]);
    assert_eq!(runner.anomaly_count(AnomalyKind::UnsatisfiedWait), 0);
}

#[test]
fn independent_objects_do_not_interfere() {
    let (runner, _) = multi_line(vec![
        sync(1, SyncKind::Event, 1, 1),
        sync(2, SyncKind::CriticalSection, 1, 0),
        sync(2, SyncKind::Event, 1, 0),
        bb(1),
    ]);

    assert_eq!(runner.basic_block_count(t(1)), 1);
    assert_eq!(runner.expected_sequence(SyncKind::Event, SyncObjectId::new(1)), 2);
    assert_eq!(
        runner.expected_sequence(SyncKind::CriticalSection, SyncObjectId::new(1)),
        1
    );
}

#[test]
fn released_thread_inherits_causal_clock() {
    let (runner, _) = multi_line(vec![
        sync(2, SyncKind::Mutex, 4, 1),
        TraceRecord::new(t(1), 900, TraceEvent::BasicBlockEnd),
        sync(1, SyncKind::Mutex, 4, 0),
    ]);

    assert!(runner.thread(t(2)).unwrap().logical_clock() >= 900);
}

// =============================================================================
// Thread lifecycle
// =============================================================================

#[test]
fn created_thread_waits_for_its_creator() {
    let (runner, _) = multi_line(vec![
        sync(1, SyncKind::Mutex, 2, 0),
        TraceRecord::new(
            t(1),
            5,
            TraceEvent::CreateThread {
                new_thread: t(2),
                suspended: false,
            },
        ),
        bb(2),
        sync(2, SyncKind::Mutex, 2, 1),
    ]);

    assert_eq!(runner.basic_block_count(t(2)), 1);
    assert_eq!(runner.anomaly_count(AnomalyKind::StaleSequence), 0);
    let crossings = runner.crossings();
    assert_eq!(crossings.last().map(|c| c.thread), Some(t(2)));
}

#[test]
fn thread_finished_notifies_once() {
    let (runner, observer) = multi_line(vec![
        bb(1),
        bb(2),
        TraceRecord::new(t(1), 1, TraceEvent::ThreadFinished),
        TraceRecord::new(t(2), 1, TraceEvent::ThreadFinished),
    ]);

    assert_eq!(observer.finish_count(t(1)), 1);
    assert_eq!(observer.finish_count(t(2)), 1);
    assert!(runner.live_threads().is_empty());
}

// =============================================================================
// Stop and stalls
// =============================================================================

#[test]
fn stop_terminates_a_blocked_line() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let observer = Arc::new(RecordingObserver::new("stop"));
    let mut runner = Runner::new(RunnerConfig::new().multi_line());
    runner.add_observer(Arc::clone(&observer));
    runner.open(ChannelSource::new(rx));
    let handle = runner.handle();

    tx.send(bb(3)).unwrap();
    tx.send(sync(3, SyncKind::Mutex, 5, 7)).unwrap();
    tx.send(bb(3)).unwrap();

    let worker = thread::spawn(move || {
        runner.run_mt().unwrap();
        runner
    });

    while handle.wait_state(t(3)) != Some(WaitState::WaitingMutex) {
        thread::sleep(Duration::from_millis(1));
    }
    handle.request_to_stop();
    drop(tx);
    let runner = worker.join().unwrap();

    assert_eq!(observer.finish_count(t(3)), 1);
    assert_eq!(runner.basic_block_count(t(3)), 1);
    assert_eq!(runner.anomaly_count(AnomalyKind::UnsatisfiedWait), 0);
    assert!(handle.is_stop_requested());
}

#[test]
fn stop_message_from_handle() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let observer = Arc::new(RecordingObserver::new("stop"));
    let mut runner = Runner::new(RunnerConfig::new().multi_line());
    runner.add_observer(Arc::clone(&observer));
    runner.open(ChannelSource::new(rx));
    let handle = runner.handle();

    tx.send(sync(1, SyncKind::Event, 8, 3)).unwrap();
    let worker = thread::spawn(move || {
        runner.run_mt().unwrap();
        runner
    });

    while handle.wait_state(t(1)) != Some(WaitState::WaitingEvent) {
        thread::sleep(Duration::from_millis(1));
    }
    handle.post_message(t(1), MessageKind::RequestStop, "");
    assert!(handle.is_stop_requested());

    // no further records arrive: the blocked line must finish on its own
    let deadline = Instant::now() + Duration::from_secs(5);
    while observer.finish_count(t(1)) == 0 {
        assert!(Instant::now() < deadline, "blocked line ignored the stop");
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(handle.wait_state(t(1)), None);

    drop(tx);
    let runner = worker.join().unwrap();
    assert_eq!(observer.finish_count(t(1)), 1);
    assert!(runner.is_stop_requested());
}

#[test]
fn stall_is_resolved_with_anomalies() {
    let (runner, observer) = multi_line(vec![
        sync(1, SyncKind::Mutex, 1, 1),
        sync(2, SyncKind::Mutex, 2, 1),
        bb(3),
    ]);

    assert_eq!(runner.anomaly_count(AnomalyKind::UnsatisfiedWait), 2);
    assert_eq!(observer.finish_count(t(1)), 1);
    assert_eq!(observer.finish_count(t(2)), 1);
    // thread 3 drained before the stall and stays live
    assert_eq!(runner.live_threads(), vec![t(3)]);
}

#[test]
fn suspended_thread_never_resumed_is_reported() {
    let (runner, _) = multi_line(vec![
        TraceRecord::new(
            t(1),
            0,
            TraceEvent::CreateThread {
                new_thread: t(2),
                suspended: true,
            },
        ),
        bb(2),
    ]);

    let anomalies = runner.anomalies();
    let unsatisfied: Vec<_> = anomalies
        .iter()
        .filter(|a| a.anomaly.kind() == AnomalyKind::UnsatisfiedWait)
        .collect();
    assert_eq!(unsatisfied.len(), 1);
    assert_eq!(unsatisfied[0].thread, t(2));
}

#[test]
fn run_mt_without_trace_fails() {
    let mut runner = Runner::new(RunnerConfig::new().multi_line());
    assert!(runner.execute().unwrap_err().is_trace_not_open());
}
