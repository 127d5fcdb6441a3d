//! Scenario: Idempotent Apply
//!
//! # Invariants under test
//!
//! 1. Re-applying an event with an already seen `(entity_id, source_seq)`
//!    is a no-op: `epoch` increments exactly once.
//! 2. The same sequence number from a different origin is not a duplicate.
//! 3. Redelivering an identical poll snapshot leaves the epoch unchanged.
//! 4. A legacy channel alias redelivering the same payload is deduped, since
//!    the normalizer derives the same id and sequence for it.
//! 5. A push redelivered after its notification was evicted by the cap is
//!    still a duplicate and never displaces a newer entry.
//! 6. A push redelivered after its notification was dismissed or cleared
//!    does not bring it back, with or without a sequence number.
//!
//! All tests are pure in-process.

use rod_reconcile::{
    normalize_push, ChangeEvent, Disposition, EngineConfig, Notification, Order, OrderStatus, Origin, Priority,
    ReconciliationEngine, Snapshot,
};
use serde_json::{json, Value};

const T0: i64 = 1_700_000_000_000;

fn order(id: &str, status: OrderStatus, ts: i64) -> Order {
    Order {
        id: id.to_string(),
        external_id: id.to_string(),
        status,
        total_amount_cents: 990,
        items: Vec::new(),
        customer_name: String::new(),
        channel: "web".to_string(),
        created_at_ms: T0,
        updated_at_ms: ts,
        version: 0,
    }
}

fn note(id: &str) -> Notification {
    Notification {
        id: id.to_string(),
        kind: "order".to_string(),
        priority: Priority::Normal,
        title: "New order".to_string(),
        message: String::new(),
        timestamp_ms: T0,
        read: false,
        data: Value::Null,
    }
}

#[test]
fn same_seq_twice_bumps_epoch_once() {
    let mut engine = ReconciliationEngine::default();
    let ev = ChangeEvent::order(order("o1", OrderStatus::Received, T0), Some(7), Origin::Push);

    let first = engine.apply(ev.clone(), T0);
    assert_eq!(first.disposition, Disposition::Applied);
    assert_eq!(first.epoch, 1);

    let before = engine.state();
    let second = engine.apply(ev, T0 + 1);
    assert_eq!(second.disposition, Disposition::Duplicate);
    assert_eq!(second.epoch, 1);
    assert_eq!(*engine.state(), *before);
}

#[test]
fn duplicate_notification_is_not_counted_twice() {
    let mut engine = ReconciliationEngine::default();
    let ev = ChangeEvent::notification(note("n1"), Some(3), Origin::Push);
    engine.apply(ev.clone(), T0);
    engine.apply(ev, T0);
    let state = engine.state();
    assert_eq!(state.notifications.len(), 1);
    assert_eq!(state.unread_count, 1);
    assert_eq!(state.epoch, 1);
}

#[test]
fn seq_is_scoped_by_origin() {
    let mut engine = ReconciliationEngine::default();
    engine.apply(
        ChangeEvent::order(order("o1", OrderStatus::Received, T0), Some(1), Origin::Push),
        T0,
    );
    let out = engine.apply(
        ChangeEvent::order_status("o1", OrderStatus::Preparing, Some(1), T0 + 10, Origin::Poll),
        T0 + 10,
    );
    assert_eq!(out.disposition, Disposition::Applied);
}

#[test]
fn identical_snapshot_is_a_no_op() {
    let mut engine = ReconciliationEngine::default();
    let snap = Snapshot::orders(
        T0 + 1_000,
        vec![order("o1", OrderStatus::Preparing, T0 + 500)],
        true,
    );
    let first = engine.apply_snapshot(snap.clone(), T0 + 1_000);
    assert!(first.changed);
    let second = engine.apply_snapshot(snap, T0 + 1_000);
    assert!(!second.changed);
    assert_eq!(second.epoch, first.epoch);
}

#[test]
fn legacy_alias_redelivery_is_deduped() {
    let payload = json!({"title": "Order #12", "type": "order"});
    let mut engine = ReconciliationEngine::default();
    for channel in ["notifications.new", "notifications.new"] {
        for ev in normalize_push(channel, &payload, T0).unwrap() {
            engine.apply(ev, T0);
        }
    }
    assert_eq!(engine.state().notifications.len(), 1);

    let order_payload = json!({"status": "new", "total": 4.5, "createdAt": T0});
    let a = normalize_push("order:new", &order_payload, T0).unwrap();
    let b = normalize_push("new-order", &order_payload, T0 + 5).unwrap();
    assert_eq!(
        engine.apply(a[0].clone(), T0).disposition,
        Disposition::Applied
    );
    assert_eq!(
        engine.apply(b[0].clone(), T0 + 5).disposition,
        Disposition::Duplicate
    );
    assert_eq!(engine.state().orders.len(), 1);
}

fn note_at(id: &str, ts: i64) -> Notification {
    Notification {
        timestamp_ms: ts,
        ..note(id)
    }
}

fn notification_ids(engine: &ReconciliationEngine) -> Vec<String> {
    engine
        .state()
        .notifications
        .iter()
        .map(|n| n.id.clone())
        .collect()
}

#[test]
fn redelivery_after_eviction_is_a_duplicate() {
    let mut engine = ReconciliationEngine::new(EngineConfig {
        retained_notifications: 2,
        ..EngineConfig::default()
    });
    for (i, id) in ["n1", "n2", "n3"].into_iter().enumerate() {
        engine.apply(
            ChangeEvent::notification(note_at(id, 1_000 + i as i64), Some(1), Origin::Push),
            T0,
        );
    }
    assert_eq!(notification_ids(&engine), ["n3", "n2"]);
    let epoch = engine.epoch();

    let again = engine.apply(
        ChangeEvent::notification(note_at("n1", 1_000), Some(1), Origin::Push),
        T0 + 1,
    );
    assert_eq!(again.disposition, Disposition::Duplicate);
    assert_eq!(again.epoch, epoch);
    assert_eq!(notification_ids(&engine), ["n3", "n2"]);
}

#[test]
fn unsequenced_redelivery_after_eviction_keeps_newer_entries() {
    let mut engine = ReconciliationEngine::new(EngineConfig {
        retained_notifications: 2,
        ..EngineConfig::default()
    });
    for (i, id) in ["n1", "n2", "n3"].into_iter().enumerate() {
        engine.apply(
            ChangeEvent::notification(note_at(id, 1_000 + i as i64), None, Origin::Push),
            T0,
        );
    }
    let again = engine.apply(
        ChangeEvent::notification(note_at("n1", 1_000), None, Origin::Push),
        T0 + 1,
    );
    assert_eq!(again.disposition, Disposition::NoChange);
    assert_eq!(notification_ids(&engine), ["n3", "n2"]);
}

#[test]
fn redelivery_after_dismissal_stays_dismissed() {
    let mut engine = ReconciliationEngine::default();
    let ev = ChangeEvent::notification(note("n1"), Some(7), Origin::Push);
    engine.apply(ev.clone(), T0);
    engine.dismiss_notification("n1", T0 + 10);
    let epoch = engine.epoch();

    let again = engine.apply(ev, T0 + 20);
    assert_eq!(again.disposition, Disposition::Duplicate);
    assert_eq!(again.epoch, epoch);

    let unsequenced = engine.apply(
        ChangeEvent::notification(note("n1"), None, Origin::Push),
        T0 + 30,
    );
    assert_eq!(unsequenced.disposition, Disposition::NoChange);

    let state = engine.state();
    assert!(state.notifications.is_empty());
    assert_eq!(state.unread_count, 0);
    assert_eq!(state.epoch, epoch);
}

#[test]
fn redelivery_after_clear_stays_cleared() {
    let mut engine = ReconciliationEngine::default();
    engine.apply(ChangeEvent::notification(note("n1"), Some(1), Origin::Push), T0);
    engine.apply(
        ChangeEvent::notification(note_at("n2", T0 + 1), Some(1), Origin::Push),
        T0 + 1,
    );
    engine.clear_notifications(T0 + 10);

    for id in ["n1", "n2"] {
        let out = engine.apply(
            ChangeEvent::notification(note_at(id, T0), Some(2), Origin::Push),
            T0 + 20,
        );
        assert_eq!(out.disposition, Disposition::NoChange);
    }
    assert!(engine.state().notifications.is_empty());
    assert_eq!(engine.state().unread_count, 0);
}
