//! Scenario: Poller Backoff And Authentication
//!
//! # Invariants under test
//!
//! 1. The first tick runs immediately; after success the next waits one
//!    interval.
//! 2. Consecutive transient failures double the delay up to the cap, and a
//!    success resets it.
//! 3. `stale` is flagged on the failure that reaches the threshold.
//! 4. A 401 ends the poller: one `Unauthorized` event, no further requests.
//! 5. The session raises `StaleData` once and `DataFresh` on recovery.
//! 6. The session reports `AuthenticationLost` on a poll 401.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeApi, T0};
use rod_session::{
    Notice, PollEvent, PollerExit, PollerSettings, Session, SessionClock, SessionSettings,
    SnapshotPoller,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

fn settings() -> PollerSettings {
    PollerSettings {
        interval: Duration::from_secs(1),
        max_backoff: Duration::from_secs(5),
        stale_after_failures: 3,
        orders_page_limit: 20,
        notifications_limit: 50,
    }
}

#[tokio::test(start_paused = true)]
async fn failures_back_off_and_success_resets() {
    let api = FakeApi::new();
    api.add_order("o1", "received");
    api.with(|b| b.fail_polls = 4);
    let (tx, mut rx) = mpsc::channel::<PollEvent>(16);
    let start = Instant::now();
    let poller = SnapshotPoller::start(
        Arc::new(api.clone()),
        settings(),
        SessionClock::starting_at(T0),
        tx,
    );

    let mut arrivals = Vec::new();
    for _ in 0..6 {
        let ev = rx.recv().await.unwrap();
        arrivals.push((start.elapsed().as_secs(), ev));
    }

    let summary: Vec<(u64, &str, bool)> = arrivals
        .iter()
        .map(|(t, ev)| match ev {
            PollEvent::Snapshot(_) => (*t, "ok", false),
            PollEvent::Failed { stale, .. } => (*t, "fail", *stale),
            PollEvent::Unauthorized => (*t, "401", false),
        })
        .collect();
    // Delays: 0, then 2, 4, 5 (capped), 5, then success and one interval.
    assert_eq!(
        summary,
        vec![
            (0, "fail", false),
            (2, "fail", false),
            (6, "fail", true),
            (11, "fail", true),
            (16, "ok", false),
            (17, "ok", false),
        ]
    );

    assert_eq!(poller.stop().await, PollerExit::Stopped);
}

#[tokio::test(start_paused = true)]
async fn unauthorized_stops_polling() {
    let api = FakeApi::new();
    api.with(|b| b.unauthorized = true);
    let (tx, mut rx) = mpsc::channel::<PollEvent>(16);
    let poller = SnapshotPoller::start(
        Arc::new(api.clone()),
        settings(),
        SessionClock::starting_at(T0),
        tx,
    );

    assert_eq!(rx.recv().await, Some(PollEvent::Unauthorized));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(api.count_calls("GET /orders"), 1);
    assert!(poller.is_finished());
    assert_eq!(poller.stop().await, PollerExit::Unauthorized);
}

#[tokio::test(start_paused = true)]
async fn incomplete_order_rows_do_not_count_as_complete_listing() {
    let api = FakeApi::new();
    api.add_order("o1", "received");
    api.with(|b| {
        b.orders
            .insert("bad".to_string(), serde_json::json!({"id": "bad", "status": "teleported"}))
    });
    let snap = rod_session::poller::poll_once(&api, &settings(), T0).await.unwrap();
    let orders = snap.orders.unwrap();
    assert_eq!(orders.orders.len(), 1);
    assert!(!orders.complete);
}

#[tokio::test(start_paused = true)]
async fn session_flags_stale_once_and_recovers() {
    let api = FakeApi::new();
    api.add_order("o1", "received");
    api.with(|b| b.fail_polls = 4);
    let session = Session::start_with_clock(
        Arc::new(api.clone()),
        SessionSettings {
            engine: Default::default(),
            notifications_limit: 50,
            poll: Some(settings()),
            push: None,
        },
        SessionClock::starting_at(T0),
    );
    let mut notices = session.notices();

    let first = notices.recv().await.unwrap();
    assert_eq!(
        first,
        Notice::StaleData {
            consecutive_failures: 3
        }
    );
    assert!(session.state().stale);

    let second = notices.recv().await.unwrap();
    assert_eq!(second, Notice::DataFresh);
    let state = session.state();
    assert!(!state.stale);
    assert!(state.order("o1").is_some());
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn session_reports_authentication_lost() {
    let api = FakeApi::new();
    api.with(|b| b.unauthorized = true);
    let session = Session::start_with_clock(
        Arc::new(api.clone()),
        SessionSettings {
            engine: Default::default(),
            notifications_limit: 50,
            poll: Some(settings()),
            push: None,
        },
        SessionClock::starting_at(T0),
    );
    let mut notices = session.notices();
    assert_eq!(
        notices.recv().await.unwrap(),
        Notice::AuthenticationLost {
            source: "poll".to_string()
        }
    );
    session.shutdown().await;
}
