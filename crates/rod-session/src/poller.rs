//! Periodic REST snapshot poller.
//!
//! Each tick fetches every orders page and the notifications list, then hands
//! one [`Snapshot`] to the session. Transient failures back off exponentially;
//! a 401 stops the poller for good.

use std::sync::Arc;
use std::time::Duration;

use rod_config::DashboardConfig;
use rod_reconcile::normalizer::{notifications_from_page, orders_from_pages};
use rod_reconcile::{MalformedEvent, OrdersSnapshot, Snapshot};
use rod_schemas::OrdersPage;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiError, DashboardApi};
use crate::backoff::Backoff;
use crate::clock::SessionClock;

pub const STOP_GRACE: Duration = Duration::from_secs(1);

/// A listing longer than this is applied as incomplete (no eviction).
pub const MAX_ORDER_PAGES: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerSettings {
    pub interval: Duration,
    pub max_backoff: Duration,
    pub stale_after_failures: u32,
    pub orders_page_limit: u32,
    pub notifications_limit: u32,
}

impl PollerSettings {
    pub fn from_config(cfg: &DashboardConfig) -> Self {
        Self {
            interval: cfg.poll_interval(),
            max_backoff: cfg.max_poll_backoff(),
            stale_after_failures: cfg.poll.stale_after_failures.max(1),
            orders_page_limit: cfg.poll.orders_page_limit,
            notifications_limit: cfg.notifications.fetch_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Snapshot(Snapshot),
    Failed {
        error: ApiError,
        consecutive_failures: u32,
        /// `consecutive_failures` reached the stale threshold.
        stale: bool,
    },
    /// The server answered 401. No further ticks follow.
    Unauthorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerExit {
    Stopped,
    Unauthorized,
    /// The receiving side went away.
    SessionClosed,
}

pub struct SnapshotPoller;

impl SnapshotPoller {
    /// Spawn the poll loop. The first tick runs immediately.
    pub fn start<T>(
        api: Arc<dyn DashboardApi>,
        settings: PollerSettings,
        clock: SessionClock,
        tx: mpsc::Sender<T>,
    ) -> PollerHandle
    where
        T: From<PollEvent> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run(api, settings, clock, tx, stop_rx));
        PollerHandle { stop_tx, task }
    }
}

pub struct PollerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<PollerExit>,
}

impl PollerHandle {
    /// Stop polling and wait for the loop to exit. An in-flight fetch is
    /// abandoned; a loop that does not exit within [`STOP_GRACE`] is aborted.
    pub async fn stop(mut self) -> PollerExit {
        let _ = self.stop_tx.send(true);
        match tokio::time::timeout(STOP_GRACE, &mut self.task).await {
            Ok(Ok(exit)) => exit,
            Ok(Err(_)) => PollerExit::Stopped,
            Err(_) => {
                self.task.abort();
                PollerExit::Stopped
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn run<T>(
    api: Arc<dyn DashboardApi>,
    settings: PollerSettings,
    clock: SessionClock,
    tx: mpsc::Sender<T>,
    mut stop: watch::Receiver<bool>,
) -> PollerExit
where
    T: From<PollEvent> + Send + 'static,
{
    let mut backoff = Backoff::new(settings.interval, settings.max_backoff);
    let mut delay = Duration::ZERO;
    info!(interval_ms = settings.interval.as_millis() as u64, "poller started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop.changed() => return PollerExit::Stopped,
        }

        let fetched_at_ms = clock.now_ms();
        let result = tokio::select! {
            r = poll_once(api.as_ref(), &settings, fetched_at_ms) => r,
            _ = stop.changed() => return PollerExit::Stopped,
        };

        let event = match result {
            Ok(snapshot) => {
                if backoff.failures() > 0 {
                    info!(after_failures = backoff.failures(), "poll recovered");
                }
                backoff.reset();
                delay = settings.interval;
                PollEvent::Snapshot(snapshot)
            }
            Err(ApiError::Unauthorized) => {
                warn!("poll rejected with 401; polling suspended");
                let _ = tx.send(PollEvent::Unauthorized.into()).await;
                return PollerExit::Unauthorized;
            }
            Err(error) => {
                delay = backoff.record_failure();
                let consecutive_failures = backoff.failures();
                warn!(
                    %error,
                    consecutive_failures,
                    retry_in_ms = delay.as_millis() as u64,
                    "poll failed"
                );
                PollEvent::Failed {
                    error,
                    consecutive_failures,
                    stale: consecutive_failures >= settings.stale_after_failures,
                }
            }
        };

        if tx.send(event.into()).await.is_err() {
            return PollerExit::SessionClosed;
        }
    }
}

/// One full poll: every orders page, then the notifications list.
pub async fn poll_once(
    api: &dyn DashboardApi,
    settings: &PollerSettings,
    fetched_at_ms: i64,
) -> Result<Snapshot, ApiError> {
    let (pages, all_pages) = fetch_all_orders(api, settings.orders_page_limit).await?;
    let (orders, bad_orders) = orders_from_pages(&pages, fetched_at_ms);
    log_malformed("orders", &bad_orders);

    let page = api.fetch_notifications(settings.notifications_limit).await?;
    let (notifications, bad_notifications) = notifications_from_page(&page, fetched_at_ms);
    log_malformed("notifications", &bad_notifications);

    debug!(
        orders = orders.len(),
        notifications = notifications.items.len(),
        complete = all_pages && bad_orders.is_empty(),
        "poll fetched"
    );

    Ok(Snapshot {
        fetched_at_ms,
        orders: Some(OrdersSnapshot {
            orders,
            // A dropped row must not read as a removed order.
            complete: all_pages && bad_orders.is_empty(),
        }),
        notifications: Some(notifications),
    })
}

/// Returns the pages and whether every page was fetched.
async fn fetch_all_orders(
    api: &dyn DashboardApi,
    limit: u32,
) -> Result<(Vec<OrdersPage>, bool), ApiError> {
    let mut pages = Vec::new();
    let mut page = 1;
    loop {
        let p = api.fetch_orders_page(page, limit).await?;
        let total = p.total_pages.max(1);
        pages.push(p);
        if page >= total {
            return Ok((pages, true));
        }
        if page >= MAX_ORDER_PAGES {
            warn!(total_pages = total, "orders listing truncated");
            return Ok((pages, false));
        }
        page += 1;
    }
}

fn log_malformed(source: &str, errors: &[MalformedEvent]) {
    for e in errors {
        warn!(source, error = %e, "dropping malformed record");
    }
}
