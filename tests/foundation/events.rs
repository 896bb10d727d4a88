//! Integration tests for identifiers and trace events

use bbreplay_foundation::{Address, SyncKind, SyncObjectId, ThreadId, TraceEvent, TraceRecord};
use proptest::prelude::*;

// =============================================================================
// Identifiers
// =============================================================================

#[test]
fn identifiers_display() {
    assert_eq!(ThreadId::new(3).to_string(), "T3");
    assert_eq!(Address::new(0x401000).to_string(), "0x401000");
    assert_eq!(SyncObjectId::new(0x10).to_string(), "0x10");
}

#[test]
fn identifiers_convert_from_raw() {
    assert_eq!(ThreadId::from(9), ThreadId::new(9));
    assert_eq!(Address::from(0x10u64).raw(), 0x10);
}

// =============================================================================
// Events
// =============================================================================

#[test]
fn wait_objects_share_a_ledger() {
    assert!(!SyncKind::CriticalSection.is_wait_object());
    assert!(SyncKind::Event.is_wait_object());
    assert!(SyncKind::Mutex.is_wait_object());
}

#[test]
fn event_classification() {
    let sync = TraceEvent::Sync {
        object: SyncObjectId::new(1),
        kind: SyncKind::Mutex,
        seq: 0,
        ts: 0,
    };
    assert!(sync.is_sync());
    assert!(!sync.is_lifecycle());

    let create = TraceEvent::CreateThread {
        new_thread: ThreadId::new(2),
        suspended: true,
    };
    assert!(create.is_lifecycle());
    assert!(TraceEvent::ThreadFinished.is_lifecycle());
    assert!(!TraceEvent::BasicBlockEnd.is_lifecycle());
}

#[test]
fn record_kind_name_follows_event() {
    let record = TraceRecord::new(ThreadId::new(1), 5, TraceEvent::ThreadFinished);
    assert_eq!(record.kind_name(), "thread-finished");
    assert_eq!(record.ts, 5);
}

proptest! {
    #[test]
    fn thread_id_round_trips_raw(raw in any::<u32>()) {
        prop_assert_eq!(ThreadId::new(raw).raw(), raw);
        prop_assert_eq!(ThreadId::new(raw).to_string(), format!("T{raw}"));
    }

    #[test]
    fn address_display_is_lower_hex(raw in any::<u64>()) {
        prop_assert_eq!(Address::new(raw).to_string(), format!("{raw:#x}"));
    }
}
