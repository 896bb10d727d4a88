//! Sync gate tests
//!
//! Tests ledger decisions and crossings outside of a runner.

use bbreplay_engine::ledger::cross;
use bbreplay_engine::{GateDecision, Ledgers, PendingSync, ThreadContext};
use bbreplay_foundation::{SyncKind, SyncObjectId, ThreadId};

fn pending(kind: SyncKind, seq: u32, ts: u64) -> PendingSync {
    PendingSync {
        object: SyncObjectId::new(5),
        kind,
        seq,
        ts,
    }
}

// =============================================================================
// Decisions
// =============================================================================

#[test]
fn decisions_follow_expected_sequence() {
    let mut ledgers = Ledgers::new();
    let object = SyncObjectId::new(5);
    let ledger = ledgers.for_kind(SyncKind::Mutex);
    assert_eq!(ledger.decide(object, 0), GateDecision::Proceed);
    assert_eq!(ledger.decide(object, 2), GateDecision::Block { expected: 0 });

    let mut ctx = ThreadContext::new(ThreadId::new(1));
    cross(&mut ledgers, &mut ctx, pending(SyncKind::Mutex, 0, 10));
    cross(&mut ledgers, &mut ctx, pending(SyncKind::Mutex, 1, 11));

    let ledger = ledgers.for_kind(SyncKind::Mutex);
    assert_eq!(ledger.decide(object, 0), GateDecision::Stale { expected: 2 });
    assert_eq!(ledger.decide(object, 2), GateDecision::Proceed);
}

#[test]
fn events_and_mutexes_share_a_ledger() {
    let mut ledgers = Ledgers::new();
    let mut ctx = ThreadContext::new(ThreadId::new(1));
    cross(&mut ledgers, &mut ctx, pending(SyncKind::Event, 0, 1));

    let object = SyncObjectId::new(5);
    assert_eq!(ledgers.for_kind(SyncKind::Mutex).expected(object), 1);
    assert_eq!(ledgers.for_kind(SyncKind::CriticalSection).expected(object), 0);
}

// =============================================================================
// Clocks
// =============================================================================

#[test]
fn crossing_inherits_the_previous_crossers_clock() {
    let mut ledgers = Ledgers::new();
    let mut first = ThreadContext::new(ThreadId::new(1));
    first.observe_ts(500);
    cross(&mut ledgers, &mut first, pending(SyncKind::CriticalSection, 0, 100));

    let mut second = ThreadContext::new(ThreadId::new(2));
    let crossing = cross(&mut ledgers, &mut second, pending(SyncKind::CriticalSection, 1, 120));

    assert_eq!(second.logical_clock(), 500);
    assert_eq!(crossing.ts, 500);
    assert_eq!(crossing.thread, ThreadId::new(2));
    assert_eq!(second.sync_crossings(), 1);
}

#[test]
fn due_check_matches_ledger() {
    let mut ledgers = Ledgers::new();
    let waiting = pending(SyncKind::CriticalSection, 1, 0);
    assert!(!ledgers.is_due(&waiting));

    let mut ctx = ThreadContext::new(ThreadId::new(1));
    cross(&mut ledgers, &mut ctx, pending(SyncKind::CriticalSection, 0, 0));
    assert!(ledgers.is_due(&waiting));
}
