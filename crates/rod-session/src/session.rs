//! The session task: sole owner of the [`ReconciliationEngine`].
//!
//! Every input (push frames, poll results, user commands, timer expiries,
//! REST replies) arrives on one `mpsc` queue and is applied in order. Other
//! tasks only send. State goes out through a `watch` channel as
//! `Arc<ReconciledState>`; user-facing notices through `broadcast`.
//!
//! Each pending mutation owns exactly one timer task. Superseding a mutation
//! aborts its timer, and a timer that fires for a mutation that is no longer
//! current is ignored by mutation id.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rod_config::DashboardConfig;
use rod_reconcile::normalizer::{normalize_push, notifications_from_page, order_from_value};
use rod_reconcile::{
    ChangeEvent, DesiredState, EngineConfig, EngineEffect, EntityType, MutationError, MutationKey,
    MutationStatus, OrderResync, OrderStatus, Origin, PendingMutation, ReconciledState,
    ReconciliationEngine, Snapshot,
};
use rod_schemas::NotificationsPage;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiError, DashboardApi};
use crate::clock::SessionClock;
use crate::poller::{PollEvent, PollerHandle, PollerSettings, SnapshotPoller};
use crate::push::{PushClient, PushEvent, PushHandle, PushSettings};

const INPUT_QUEUE: usize = 1024;
const NOTICE_QUEUE: usize = 256;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub engine: EngineConfig,
    /// `limit` for notifications resync fetches.
    pub notifications_limit: u32,
    /// `None` disables polling.
    pub poll: Option<PollerSettings>,
    /// `None` disables the push socket.
    pub push: Option<PushSettings>,
}

impl SessionSettings {
    pub fn from_config(cfg: &DashboardConfig, token: Option<String>) -> Self {
        Self {
            engine: EngineConfig {
                mutation_timeout_ms: i64::try_from(cfg.mutations.timeout_ms).unwrap_or(i64::MAX),
                retained_notifications: cfg.notifications.retained_cap,
            },
            notifications_limit: cfg.notifications.fetch_limit,
            poll: Some(PollerSettings::from_config(cfg)),
            push: Some(PushSettings::from_config(cfg, token)),
        }
    }
}

/// User-visible events that are not part of the state itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    MutationRolledBack {
        entity_type: EntityType,
        entity_id: String,
        message: String,
    },
    /// Polling has failed `consecutive_failures` times in a row.
    StaleData { consecutive_failures: u32 },
    DataFresh,
    /// A 401 was seen; polling and push are stopped.
    AuthenticationLost { source: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    Refused(MutationError),
    /// The session task is gone.
    Closed,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Refused(e) => write!(f, "refused: {e}"),
            SessionError::Closed => write!(f, "session is shut down"),
        }
    }
}

impl std::error::Error for SessionError {}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

pub(crate) enum Input {
    Poll(PollEvent),
    Push(PushEvent),
    Command(Command),
    MutationTimer { key: MutationKey, mutation_id: u64 },
    Reply(Reply),
    Shutdown(oneshot::Sender<()>),
}

impl From<PollEvent> for Input {
    fn from(e: PollEvent) -> Self {
        Input::Poll(e)
    }
}

impl From<PushEvent> for Input {
    fn from(e: PushEvent) -> Self {
        Input::Push(e)
    }
}

type MutationReply = oneshot::Sender<Result<PendingMutation, SessionError>>;

pub(crate) enum Command {
    OrderStatus {
        order_id: String,
        status: OrderStatus,
        reply: MutationReply,
    },
    MarkRead {
        id: String,
        reply: MutationReply,
    },
    MarkAllRead {
        reply: oneshot::Sender<Vec<PendingMutation>>,
    },
    Dismiss {
        id: String,
        reply: oneshot::Sender<()>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
}

pub(crate) enum Reply {
    OrderStatus {
        key: MutationKey,
        mutation_id: u64,
        result: Result<Value, ApiError>,
    },
    Read {
        key: MutationKey,
        mutation_id: u64,
        result: Result<(), ApiError>,
    },
    ReadAll {
        mutations: Vec<(MutationKey, u64)>,
        result: Result<(), ApiError>,
    },
    Removal {
        what: &'static str,
        result: Result<(), ApiError>,
    },
    OrderResync {
        order_id: String,
        fetched_at_ms: i64,
        result: Result<Option<Value>, ApiError>,
    },
    NotificationsResync {
        fetched_at_ms: i64,
        result: Result<NotificationsPage, ApiError>,
    },
}

// ---------------------------------------------------------------------------
// Session / handle
// ---------------------------------------------------------------------------

pub struct Session;

impl Session {
    /// Spawn the session task (and its poller and push reader, if enabled).
    /// Must be called inside a tokio runtime.
    pub fn start(api: Arc<dyn DashboardApi>, settings: SessionSettings) -> SessionHandle {
        Self::start_with_clock(api, settings, SessionClock::system())
    }

    pub fn start_with_clock(
        api: Arc<dyn DashboardApi>,
        settings: SessionSettings,
        clock: SessionClock,
    ) -> SessionHandle {
        let (tx, rx) = mpsc::channel::<Input>(INPUT_QUEUE);
        let engine = ReconciliationEngine::new(settings.engine);
        let (state_tx, state_rx) = watch::channel(engine.state());
        let (notices_tx, _) = broadcast::channel(NOTICE_QUEUE);

        let poller = settings
            .poll
            .clone()
            .map(|p| SnapshotPoller::start(Arc::clone(&api), p, clock, tx.clone()));
        let push = settings.push.clone().map(|p| PushClient::start(p, tx.clone()));

        let task = SessionTask {
            published_epoch: engine.epoch(),
            engine,
            api,
            clock,
            tx: tx.downgrade(),
            state_tx,
            notices_tx: notices_tx.clone(),
            timers: HashMap::new(),
            order_resyncs: HashSet::new(),
            notifications_resync: false,
            poller,
            push,
            auth_lost: false,
            notifications_limit: settings.notifications_limit,
        };
        tokio::spawn(task.run(rx));

        SessionHandle {
            tx,
            state_rx,
            notices_tx,
        }
    }
}

/// Cloneable front end to a running session.
///
/// Dropping every handle does not stop the session; call
/// [`SessionHandle::shutdown`].
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Input>,
    state_rx: watch::Receiver<Arc<ReconciledState>>,
    notices_tx: broadcast::Sender<Notice>,
}

impl SessionHandle {
    /// Read-only view of the reconciled state.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ReconciledState>> {
        self.state_rx.clone()
    }

    pub fn state(&self) -> Arc<ReconciledState> {
        self.state_rx.borrow().clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices_tx.subscribe()
    }

    /// Optimistically move an order to `status` and send the request.
    pub async fn request_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<PendingMutation, SessionError> {
        let order_id = order_id.to_string();
        self.call(|reply| Command::OrderStatus {
            order_id,
            status,
            reply,
        })
        .await?
    }

    pub async fn mark_notification_read(&self, id: &str) -> Result<PendingMutation, SessionError> {
        let id = id.to_string();
        self.call(|reply| Command::MarkRead { id, reply }).await?
    }

    /// Returns one mutation per notification that was unread.
    pub async fn mark_all_notifications_read(&self) -> Result<Vec<PendingMutation>, SessionError> {
        self.call(|reply| Command::MarkAllRead { reply }).await
    }

    pub async fn dismiss_notification(&self, id: &str) -> Result<(), SessionError> {
        let id = id.to_string();
        self.call(|reply| Command::Dismiss { id, reply }).await
    }

    pub async fn clear_notifications(&self) -> Result<(), SessionError> {
        self.call(|reply| Command::Clear { reply }).await
    }

    /// Stop the poller and push reader, abort all timers, end the task.
    /// Returns once teardown is complete. Idempotent.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Input::Shutdown(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    async fn call<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Input::Command(make(reply_tx)))
            .await
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

struct SessionTask {
    engine: ReconciliationEngine,
    api: Arc<dyn DashboardApi>,
    clock: SessionClock,
    tx: mpsc::WeakSender<Input>,
    state_tx: watch::Sender<Arc<ReconciledState>>,
    notices_tx: broadcast::Sender<Notice>,
    published_epoch: u64,
    /// At most one live timer per entity, tagged with its mutation id.
    timers: HashMap<MutationKey, (u64, JoinHandle<()>)>,
    order_resyncs: HashSet<String>,
    notifications_resync: bool,
    poller: Option<PollerHandle>,
    push: Option<PushHandle>,
    auth_lost: bool,
    notifications_limit: u32,
}

impl SessionTask {
    async fn run(mut self, mut rx: mpsc::Receiver<Input>) {
        info!("session started");
        while let Some(input) = rx.recv().await {
            match input {
                Input::Shutdown(ack) => {
                    self.teardown().await;
                    let _ = ack.send(());
                    info!(epoch = self.engine.epoch(), "session stopped");
                    return;
                }
                Input::Poll(event) => self.on_poll(event).await,
                Input::Push(event) => self.on_push(event).await,
                Input::Command(cmd) => self.on_command(cmd),
                Input::MutationTimer { key, mutation_id } => self.on_timer(key, mutation_id),
                Input::Reply(reply) => self.on_reply(reply).await,
            }
            self.publish();
        }
        self.teardown().await;
    }

    fn publish(&mut self) {
        let epoch = self.engine.epoch();
        if epoch != self.published_epoch {
            self.published_epoch = epoch;
            self.state_tx.send_replace(self.engine.state());
            debug!(epoch, "state published");
        }
    }

    fn notify(&self, notice: Notice) {
        // No subscribers is fine.
        let _ = self.notices_tx.send(notice);
    }

    async fn teardown(&mut self) {
        if let Some(p) = self.poller.take() {
            p.stop().await;
        }
        if let Some(p) = self.push.take() {
            p.stop().await;
        }
        for (_, (_, timer)) in self.timers.drain() {
            timer.abort();
        }
    }

    // -----------------------------------------------------------------------
    // Poll / push
    // -----------------------------------------------------------------------

    async fn on_poll(&mut self, event: PollEvent) {
        let now = self.clock.now_ms();
        match event {
            PollEvent::Snapshot(snapshot) => {
                let out = self.engine.apply_snapshot(snapshot, now);
                debug!(
                    orders = ?out.orders,
                    notifications = ?out.notifications,
                    changed = out.changed,
                    epoch = out.epoch,
                    "poll applied"
                );
                self.on_effects(out.effects);
                if self.engine.state().stale {
                    self.engine.mark_stale(false);
                    info!("poll recovered; data fresh");
                    self.notify(Notice::DataFresh);
                }
            }
            PollEvent::Failed {
                consecutive_failures,
                stale,
                ..
            } => {
                if stale && !self.engine.state().stale {
                    self.engine.mark_stale(true);
                    warn!(consecutive_failures, "data is stale");
                    self.notify(Notice::StaleData {
                        consecutive_failures,
                    });
                }
            }
            PollEvent::Unauthorized => self.on_auth_lost("poll").await,
        }
    }

    async fn on_push(&mut self, event: PushEvent) {
        match event {
            PushEvent::Frame(env) => {
                let now = self.clock.now_ms();
                match normalize_push(&env.event, &env.data, now) {
                    Ok(events) => {
                        for ev in events {
                            let entity_id = ev.entity_id.clone();
                            let out = self.engine.apply(ev, now);
                            debug!(
                                event = %env.event,
                                %entity_id,
                                disposition = ?out.disposition,
                                epoch = out.epoch,
                                "push applied"
                            );
                            self.on_effects(out.effects);
                        }
                    }
                    Err(e) => warn!(event = %env.event, error = %e, "malformed push event dropped"),
                }
            }
            PushEvent::Connected => debug!("push connected"),
            PushEvent::Disconnected { reason } => debug!(%reason, "push disconnected"),
            PushEvent::Unauthorized => self.on_auth_lost("push").await,
        }
    }

    async fn on_auth_lost(&mut self, source: &str) {
        if self.auth_lost {
            return;
        }
        self.auth_lost = true;
        warn!(source, "authentication lost; polling and push stopped");
        if let Some(p) = self.poller.take() {
            p.stop().await;
        }
        if let Some(p) = self.push.take() {
            p.stop().await;
        }
        self.notify(Notice::AuthenticationLost {
            source: source.to_string(),
        });
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Replies are sent after the resulting state is published, so a caller
    /// that awaits a command observes its effect.
    fn on_command(&mut self, cmd: Command) {
        let now = self.clock.now_ms();
        match cmd {
            Command::OrderStatus {
                order_id,
                status,
                reply,
            } => {
                let result = match self.engine.issue_order_status(&order_id, status, now) {
                    Ok(out) => {
                        if let Some(prev) = &out.superseded {
                            self.disarm_timer(prev);
                        }
                        self.arm_timer(&out.mutation, now);
                        self.send_order_status(&out.mutation, status);
                        Ok(out.mutation)
                    }
                    Err(e) => {
                        debug!(%order_id, error = %e, "status change refused");
                        Err(SessionError::Refused(e))
                    }
                };
                self.publish();
                let _ = reply.send(result);
            }
            Command::MarkRead { id, reply } => {
                let result = match self.engine.mark_notification_read(&id, now) {
                    Ok(out) => {
                        if let Some(prev) = &out.superseded {
                            self.disarm_timer(prev);
                        }
                        self.arm_timer(&out.mutation, now);
                        let api = Arc::clone(&self.api);
                        let key = out.mutation.key();
                        let mutation_id = out.mutation.id;
                        self.spawn_reply(async move {
                            let result = api.mark_notification_read(&key.entity_id).await;
                            Reply::Read {
                                key,
                                mutation_id,
                                result,
                            }
                        });
                        Ok(out.mutation)
                    }
                    Err(e) => Err(SessionError::Refused(e)),
                };
                self.publish();
                let _ = reply.send(result);
            }
            Command::MarkAllRead { reply } => {
                let issued = self.engine.mark_all_notifications_read(now);
                let mut mutations = Vec::with_capacity(issued.len());
                for out in &issued {
                    if let Some(prev) = &out.superseded {
                        self.disarm_timer(prev);
                    }
                    self.arm_timer(&out.mutation, now);
                    mutations.push((out.mutation.key(), out.mutation.id));
                }
                if !mutations.is_empty() {
                    let api = Arc::clone(&self.api);
                    self.spawn_reply(async move {
                        let result = api.mark_all_notifications_read().await;
                        Reply::ReadAll { mutations, result }
                    });
                }
                self.publish();
                let _ = reply.send(issued.into_iter().map(|o| o.mutation).collect());
            }
            Command::Dismiss { id, reply } => {
                let out = self.engine.dismiss_notification(&id, now);
                self.on_effects(out.effects);
                let api = Arc::clone(&self.api);
                self.spawn_reply(async move {
                    let result = api.delete_notification(&id).await;
                    Reply::Removal {
                        what: "dismiss",
                        result,
                    }
                });
                self.publish();
                let _ = reply.send(());
            }
            Command::Clear { reply } => {
                let out = self.engine.clear_notifications(now);
                self.on_effects(out.effects);
                let api = Arc::clone(&self.api);
                self.spawn_reply(async move {
                    let result = api.clear_notifications().await;
                    Reply::Removal {
                        what: "clear",
                        result,
                    }
                });
                self.publish();
                let _ = reply.send(());
            }
        }
    }

    fn send_order_status(&self, m: &PendingMutation, status: OrderStatus) {
        let api = Arc::clone(&self.api);
        let key = m.key();
        let mutation_id = m.id;
        self.spawn_reply(async move {
            let result = api.update_order_status(&key.entity_id, status.as_str()).await;
            Reply::OrderStatus {
                key,
                mutation_id,
                result,
            }
        });
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    fn arm_timer(&mut self, m: &PendingMutation, now_ms: i64) {
        let key = m.key();
        if let Some((_, old)) = self.timers.remove(&key) {
            old.abort();
        }
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let delay = Duration::from_millis(u64::try_from(m.deadline_ms - now_ms).unwrap_or(0));
        let mutation_id = m.id;
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx
                .send(Input::MutationTimer {
                    key: timer_key,
                    mutation_id,
                })
                .await;
        });
        self.timers.insert(key, (mutation_id, timer));
    }

    fn disarm_timer(&mut self, m: &PendingMutation) {
        let key = m.key();
        if matches!(self.timers.get(&key), Some((id, _)) if *id == m.id) {
            if let Some((_, timer)) = self.timers.remove(&key) {
                timer.abort();
            }
        }
    }

    fn on_timer(&mut self, key: MutationKey, mutation_id: u64) {
        if matches!(self.timers.get(&key), Some((id, _)) if *id == mutation_id) {
            self.timers.remove(&key);
        }
        if self.is_current(&key, mutation_id) {
            info!(entity_id = %key.entity_id, mutation_id, "mutation timed out");
            let now = self.clock.now_ms();
            let out = self.engine.fail_mutation(&key, now);
            self.on_effects(out.effects);
        } else {
            debug!(entity_id = %key.entity_id, mutation_id, "stale timer ignored");
        }
    }

    fn is_current(&self, key: &MutationKey, mutation_id: u64) -> bool {
        self.engine.tracker().pending(key).map(|m| m.id) == Some(mutation_id)
    }

    fn fail_if_current(&mut self, key: &MutationKey, mutation_id: u64) {
        if self.is_current(key, mutation_id) {
            let now = self.clock.now_ms();
            let out = self.engine.fail_mutation(key, now);
            self.on_effects(out.effects);
        }
    }

    // -----------------------------------------------------------------------
    // Effects and replies
    // -----------------------------------------------------------------------

    fn on_effects(&mut self, effects: Vec<EngineEffect>) {
        for effect in effects {
            match effect {
                EngineEffect::MutationConfirmed(m) => {
                    self.disarm_timer(&m);
                    info!(entity_id = %m.entity_id, mutation_id = m.id, "mutation confirmed");
                }
                EngineEffect::MutationOverridden(m) => {
                    self.disarm_timer(&m);
                    info!(
                        entity_id = %m.entity_id,
                        mutation_id = m.id,
                        "optimistic value overridden by newer server state"
                    );
                }
                EngineEffect::MutationSuperseded(m) => self.disarm_timer(&m),
                EngineEffect::MutationRolledBack(m) => {
                    self.disarm_timer(&m);
                    self.notify(Notice::MutationRolledBack {
                        entity_type: m.entity_type,
                        entity_id: m.entity_id.clone(),
                        message: rollback_message(&m),
                    });
                }
                EngineEffect::ResyncOrder { order_id } => self.resync_order(order_id),
                EngineEffect::ResyncNotifications => self.resync_notifications(),
            }
        }
    }

    fn resync_order(&mut self, order_id: String) {
        if !self.order_resyncs.insert(order_id.clone()) {
            return;
        }
        let api = Arc::clone(&self.api);
        let fetched_at_ms = self.clock.now_ms();
        self.spawn_reply(async move {
            let result = api.fetch_order(&order_id).await;
            Reply::OrderResync {
                order_id,
                fetched_at_ms,
                result,
            }
        });
    }

    fn resync_notifications(&mut self) {
        if self.notifications_resync {
            return;
        }
        self.notifications_resync = true;
        let api = Arc::clone(&self.api);
        let limit = self.notifications_limit;
        let fetched_at_ms = self.clock.now_ms();
        self.spawn_reply(async move {
            let result = api.fetch_notifications(limit).await;
            Reply::NotificationsResync {
                fetched_at_ms,
                result,
            }
        });
    }

    fn spawn_reply<F>(&self, fut: F)
    where
        F: Future<Output = Reply> + Send + 'static,
    {
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let reply = fut.await;
            let _ = tx.send(Input::Reply(reply)).await;
        });
    }

    async fn on_reply(&mut self, reply: Reply) {
        let now = self.clock.now_ms();
        match reply {
            Reply::OrderStatus {
                key,
                mutation_id,
                result,
            } => match result {
                Ok(body) => match order_from_value(&body, now) {
                    Ok(order) => {
                        let out = self
                            .engine
                            .apply(ChangeEvent::order(order, None, Origin::Poll), now);
                        self.on_effects(out.effects);
                    }
                    Err(e) => {
                        warn!(entity_id = %key.entity_id, error = %e, "status response undecodable; resyncing");
                        self.resync_order(key.entity_id);
                    }
                },
                Err(e) => {
                    warn!(entity_id = %key.entity_id, mutation_id, error = %e, "status request failed");
                    self.fail_if_current(&key, mutation_id);
                    if e.is_unauthorized() {
                        self.on_auth_lost("rest").await;
                    }
                }
            },
            Reply::Read {
                key,
                mutation_id,
                result,
            } => match result {
                Ok(()) => {
                    let out = self.engine.confirm_notification_read(&key.entity_id, now);
                    self.on_effects(out.effects);
                }
                Err(e) => {
                    warn!(entity_id = %key.entity_id, mutation_id, error = %e, "read request failed");
                    self.fail_if_current(&key, mutation_id);
                    if e.is_unauthorized() {
                        self.on_auth_lost("rest").await;
                    }
                }
            },
            Reply::ReadAll { mutations, result } => match result {
                Ok(()) => {
                    for (key, _) in mutations {
                        let out = self.engine.confirm_notification_read(&key.entity_id, now);
                        self.on_effects(out.effects);
                    }
                }
                Err(e) => {
                    warn!(count = mutations.len(), error = %e, "read-all request failed");
                    for (key, mutation_id) in mutations {
                        self.fail_if_current(&key, mutation_id);
                    }
                    if e.is_unauthorized() {
                        self.on_auth_lost("rest").await;
                    }
                }
            },
            Reply::Removal { what, result } => {
                if let Err(e) = result {
                    warn!(what, error = %e, "notification removal failed; resyncing");
                    self.resync_notifications();
                    if e.is_unauthorized() {
                        self.on_auth_lost("rest").await;
                    }
                }
            }
            Reply::OrderResync {
                order_id,
                fetched_at_ms,
                result,
            } => {
                self.order_resyncs.remove(&order_id);
                let order = match result {
                    Ok(Some(body)) => match order_from_value(&body, fetched_at_ms) {
                        Ok(o) => Some(Some(o)),
                        Err(e) => {
                            warn!(%order_id, error = %e, "resync body undecodable");
                            None
                        }
                    },
                    Ok(None) => Some(None),
                    Err(e) => {
                        warn!(%order_id, error = %e, "order resync failed");
                        if e.is_unauthorized() {
                            self.on_auth_lost("rest").await;
                        }
                        None
                    }
                };
                let out = match order {
                    Some(order) => self.engine.apply_order_resync(
                        OrderResync {
                            order_id,
                            fetched_at_ms,
                            order,
                        },
                        now,
                    ),
                    None => self.engine.abandon_resync(&MutationKey::order(order_id)),
                };
                self.on_effects(out.effects);
            }
            Reply::NotificationsResync {
                fetched_at_ms,
                result,
            } => {
                self.notifications_resync = false;
                match result {
                    Ok(page) => {
                        let (snap, bad) = notifications_from_page(&page, fetched_at_ms);
                        for e in &bad {
                            warn!(error = %e, "dropping malformed notification");
                        }
                        let out = self.engine.apply_snapshot(
                            Snapshot {
                                fetched_at_ms,
                                orders: None,
                                notifications: Some(snap),
                            },
                            now,
                        );
                        self.on_effects(out.effects);
                    }
                    Err(e) => {
                        warn!(error = %e, "notifications resync failed");
                        let awaiting: Vec<MutationKey> = self
                            .engine
                            .tracker()
                            .all()
                            .into_iter()
                            .filter(|m| {
                                m.status == MutationStatus::RolledBack
                                    && m.entity_type == EntityType::Notification
                            })
                            .map(|m| m.key())
                            .collect();
                        for key in awaiting {
                            self.engine.abandon_resync(&key);
                        }
                        if e.is_unauthorized() {
                            self.on_auth_lost("rest").await;
                        }
                    }
                }
            }
        }
    }
}

fn rollback_message(m: &PendingMutation) -> String {
    match m.desired_state {
        DesiredState::OrderStatus(status) => format!(
            "Could not move order {} to {}. Showing the latest server state.",
            m.entity_id, status
        ),
        DesiredState::NotificationRead => {
            "Could not mark the notification as read. Showing the latest server state.".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_follow_config() {
        let cfg = DashboardConfig::default();
        let s = SessionSettings::from_config(&cfg, Some("t".to_string()));
        assert_eq!(s.engine.mutation_timeout_ms, 8_000);
        assert_eq!(s.engine.retained_notifications, 100);
        assert_eq!(s.notifications_limit, 50);
        assert_eq!(s.poll.as_ref().map(|p| p.interval), Some(Duration::from_secs(15)));
        assert_eq!(s.push.as_ref().and_then(|p| p.token.as_deref()), Some("t"));
    }

    #[test]
    fn rollback_message_names_the_order() {
        let m = PendingMutation {
            id: 1,
            entity_id: "o-9".to_string(),
            entity_type: EntityType::Order,
            desired_state: DesiredState::OrderStatus(OrderStatus::Ready),
            issued_at_ms: 0,
            deadline_ms: 8_000,
            attempt: 1,
            status: MutationStatus::RolledBack,
            rolled_back_at_ms: Some(8_000),
        };
        let msg = rollback_message(&m);
        assert!(msg.contains("o-9"));
        assert!(msg.contains("ready"));
    }

    #[test]
    fn notice_serializes_with_type_tag() {
        let v = serde_json::to_value(Notice::StaleData {
            consecutive_failures: 3,
        })
        .unwrap();
        assert_eq!(v["type"], "stale_data");
        assert_eq!(v["consecutive_failures"], 3);
    }
}
