//! Reconciliation engine: the single writer of [`ReconciledState`].
//!
//! # Inputs
//!
//! - [`apply`](ReconciliationEngine::apply): one normalized [`ChangeEvent`].
//! - [`apply_snapshot`](ReconciliationEngine::apply_snapshot): one poll tick.
//! - [`apply_order_resync`](ReconciliationEngine::apply_order_resync): the
//!   result of re-fetching a single order after a rollback.
//! - User intents ([`issue_order_status`](ReconciliationEngine::issue_order_status),
//!   [`mark_notification_read`](ReconciliationEngine::mark_notification_read), ...)
//!   and clock ticks ([`expire_mutations`](ReconciliationEngine::expire_mutations)).
//!
//! Every input is synchronous over the owned store. Nothing here blocks,
//! performs IO or reads a clock; `now_ms` is always passed in.
//!
//! # Orders
//!
//! Each order is held as an authoritative **base** (last accepted push/poll
//! value) plus, while a mutation is tracked, an optimistic **overlay** status.
//! The visible order is the base with the overlay substituted.
//!
//! Admission of an authoritative change to the base:
//!
//! 1. `ts < base.updated_at` is stale and dropped.
//! 2. `Forward` and `Unchanged` moves are applied.
//! 3. `Backward` / `Illegal` moves are applied only from a poll whose `ts` is
//!    strictly newer than `base.updated_at`. Pushes never move backward.
//!
//! A status change for an order the store has never seen is parked and
//! replayed when the order itself arrives; a resync for it is requested.
//!
//! # Epochs
//!
//! After every input the next state is built and compared with the published
//! one. `epoch` increments only when they differ, so duplicates and no-ops are
//! invisible to observers.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dedupe::SeenEvents;
use crate::event::{ChangeEvent, ChangePayload};
use crate::mutation::{
    DesiredState, MutationError, MutationKey, MutationTracker, PendingMutation,
    DEFAULT_MUTATION_TIMEOUT_MS,
};
use crate::notifications::{NotificationAggregator, DEFAULT_RETAINED_CAP};
use crate::snapshot::{NotificationsSnapshot, OrderResync, OrdersSnapshot, Snapshot};
use crate::status::{classify, OrderStatus, Transition};
use crate::types::{EntityType, Order, Origin, ReconciledState};
use crate::watermark::{SnapshotFreshness, SnapshotWatermark};

/// Parked status changes for unknown orders are bounded.
const MAX_PARKED: usize = 256;

// ---------------------------------------------------------------------------
// Config / outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub mutation_timeout_ms: i64,
    pub retained_notifications: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mutation_timeout_ms: DEFAULT_MUTATION_TIMEOUT_MS,
            retained_notifications: DEFAULT_RETAINED_CAP,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Accepted and the published state moved.
    Applied,
    /// Accepted but nothing visible changed.
    NoChange,
    /// `(origin, entity_id, source_seq)` already applied.
    Duplicate,
    Stale { current_ms: i64, got_ms: i64 },
    Rejected {
        from: OrderStatus,
        to: OrderStatus,
        transition: Transition,
    },
    /// Status change for an order not in the store yet.
    Parked,
    Refused(MutationError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEffect {
    MutationConfirmed(PendingMutation),
    /// Newer authoritative state disagreed; the optimistic value is gone.
    MutationOverridden(PendingMutation),
    /// Timed out or its request failed. A resync effect accompanies it.
    MutationRolledBack(PendingMutation),
    /// Replaced by a newer mutation for the same entity.
    MutationSuperseded(PendingMutation),
    ResyncOrder { order_id: String },
    ResyncNotifications,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    pub disposition: Disposition,
    pub epoch: u64,
    pub effects: Vec<EngineEffect>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotOutcome {
    /// `None` when the snapshot carried no orders half.
    pub orders: Option<SnapshotFreshness>,
    pub notifications: Option<SnapshotFreshness>,
    pub changed: bool,
    pub epoch: u64,
    pub effects: Vec<EngineEffect>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IssueOutcome {
    pub mutation: PendingMutation,
    pub superseded: Option<PendingMutation>,
    pub epoch: u64,
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

enum OrderChange {
    Full(Order),
    Status(OrderStatus),
}

impl OrderChange {
    fn status(&self) -> OrderStatus {
        match self {
            OrderChange::Full(o) => o.status,
            OrderChange::Status(s) => *s,
        }
    }
}

/// Provenance of an authoritative order change.
#[derive(Clone, Copy)]
struct Authority {
    ts_ms: i64,
    origin: Origin,
    /// Set for poll results: the fetch time, which settles rollbacks that
    /// happened before it.
    covered_at_ms: Option<i64>,
    now_ms: i64,
}

#[derive(Debug, Clone, Copy)]
struct Parked {
    status: OrderStatus,
    ts_ms: i64,
    origin: Origin,
}

fn admit(
    current: OrderStatus,
    current_ts_ms: i64,
    proposed: OrderStatus,
    ts_ms: i64,
    origin: Origin,
) -> Result<(), Disposition> {
    if ts_ms < current_ts_ms {
        return Err(Disposition::Stale {
            current_ms: current_ts_ms,
            got_ms: ts_ms,
        });
    }
    let transition = classify(current, proposed);
    if transition.is_monotonic() || (origin == Origin::Poll && ts_ms > current_ts_ms) {
        return Ok(());
    }
    Err(Disposition::Rejected {
        from: current,
        to: proposed,
        transition,
    })
}

fn push_once(effects: &mut Vec<EngineEffect>, e: EngineEffect) {
    if !effects.contains(&e) {
        effects.push(e);
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ReconciliationEngine {
    base: BTreeMap<String, Order>,
    visible: BTreeMap<String, Order>,
    parked: BTreeMap<String, Parked>,
    tracker: MutationTracker,
    notifications: NotificationAggregator,
    seen: SeenEvents,
    orders_watermark: SnapshotWatermark,
    notifications_watermark: SnapshotWatermark,
    stale: bool,
    epoch: u64,
    published: Arc<ReconciledState>,
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl ReconciliationEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            base: BTreeMap::new(),
            visible: BTreeMap::new(),
            parked: BTreeMap::new(),
            tracker: MutationTracker::new(config.mutation_timeout_ms),
            notifications: NotificationAggregator::new(config.retained_notifications),
            seen: SeenEvents::new(),
            orders_watermark: SnapshotWatermark::new(),
            notifications_watermark: SnapshotWatermark::new(),
            stale: false,
            epoch: 0,
            published: Arc::new(ReconciledState::empty()),
        }
    }

    /// Cheap handle to the current immutable state.
    pub fn state(&self) -> Arc<ReconciledState> {
        Arc::clone(&self.published)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn tracker(&self) -> &MutationTracker {
        &self.tracker
    }

    pub fn notifications(&self) -> &NotificationAggregator {
        &self.notifications
    }

    /// Earliest deadline among pending mutations.
    pub fn next_deadline_ms(&self) -> Option<i64> {
        self.tracker.next_deadline_ms()
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn apply(&mut self, event: ChangeEvent, now_ms: i64) -> ApplyOutcome {
        let kind = event.kind();
        if let Some(seq) = event.source_seq {
            if !self.seen.record(event.origin, &event.entity_id, seq) {
                debug!(
                    entity_id = %event.entity_id,
                    origin = event.origin.as_str(),
                    seq,
                    "duplicate event ignored"
                );
                return self.outcome(Disposition::Duplicate, Vec::new());
            }
        }

        let mut effects = Vec::new();
        let admitted = match (event.payload, event.origin) {
            (ChangePayload::Order(order), Origin::Optimistic) => {
                self.issue_inner(&order.id, order.status, now_ms, &mut effects)
            }
            (ChangePayload::OrderStatus(status), Origin::Optimistic) => {
                self.issue_inner(&event.entity_id, status, now_ms, &mut effects)
            }
            (ChangePayload::Order(order), origin) => {
                let auth = Authority {
                    ts_ms: event.source_timestamp_ms.max(order.updated_at_ms),
                    origin,
                    covered_at_ms: None,
                    now_ms,
                };
                let id = order.id.clone();
                self.merge_order(&id, OrderChange::Full(order), auth, &mut effects)
            }
            (ChangePayload::OrderStatus(status), origin) => {
                let auth = Authority {
                    ts_ms: event.source_timestamp_ms,
                    origin,
                    covered_at_ms: None,
                    now_ms,
                };
                self.merge_order(
                    &event.entity_id,
                    OrderChange::Status(status),
                    auth,
                    &mut effects,
                )
            }
            (ChangePayload::NotificationRead, Origin::Optimistic) => self
                .mark_read_inner(&event.entity_id, event.source_timestamp_ms, &mut effects)
                .map(|_| ())
                .map_err(Disposition::Refused),
            (payload, origin) => {
                let event = ChangeEvent {
                    payload,
                    origin,
                    ..event
                };
                self.ingest_notification(&event, &mut effects);
                Ok(())
            }
        };

        let disposition = match admitted {
            Ok(()) => {
                if self.publish() {
                    Disposition::Applied
                } else {
                    Disposition::NoChange
                }
            }
            Err(d) => {
                match &d {
                    Disposition::Stale { current_ms, got_ms } => warn!(
                        ?kind,
                        current_ms,
                        got_ms,
                        "stale event dropped"
                    ),
                    Disposition::Rejected {
                        from,
                        to,
                        transition,
                    } => warn!(
                        ?kind,
                        %from,
                        %to,
                        ?transition,
                        "non-monotonic status change dropped"
                    ),
                    Disposition::Refused(err) => warn!(error = %err, "optimistic change refused"),
                    _ => {}
                }
                // A parked change or a refusal may still have emitted effects.
                self.publish();
                d
            }
        };
        self.outcome(disposition, effects)
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    pub fn apply_snapshot(&mut self, snapshot: Snapshot, now_ms: i64) -> SnapshotOutcome {
        let mut effects = Vec::new();

        let orders = snapshot.orders.map(|orders| {
            let freshness = self.orders_watermark.accept(snapshot.fetched_at_ms);
            if freshness.is_fresh() {
                self.merge_orders_snapshot(orders, snapshot.fetched_at_ms, now_ms, &mut effects);
            } else {
                warn!(?freshness, "orders snapshot rejected");
            }
            freshness
        });

        let notifications = snapshot.notifications.map(|notes| {
            let freshness = self.notifications_watermark.accept(snapshot.fetched_at_ms);
            if freshness.is_fresh() {
                self.merge_notifications_snapshot(&notes, snapshot.fetched_at_ms, &mut effects);
            } else {
                warn!(?freshness, "notifications snapshot rejected");
            }
            freshness
        });

        let changed = self.publish();
        debug!(changed, epoch = self.epoch, "snapshot applied");
        SnapshotOutcome {
            orders,
            notifications,
            changed,
            epoch: self.epoch,
            effects,
        }
    }

    fn merge_orders_snapshot(
        &mut self,
        snap: OrdersSnapshot,
        fetched_at_ms: i64,
        now_ms: i64,
        effects: &mut Vec<EngineEffect>,
    ) {
        let mut listed = Vec::with_capacity(snap.orders.len());
        for order in snap.orders {
            let id = order.id.clone();
            let auth = Authority {
                ts_ms: order.updated_at_ms,
                origin: Origin::Poll,
                covered_at_ms: Some(fetched_at_ms),
                now_ms,
            };
            if let Err(d) = self.merge_order(&id, OrderChange::Full(order), auth, effects) {
                debug!(order_id = %id, disposition = ?d, "snapshot entry not applied");
            }
            listed.push(id);
        }

        if !snap.complete {
            return;
        }
        listed.sort_unstable();
        let missing: Vec<String> = self
            .base
            .keys()
            .filter(|id| listed.binary_search(id).is_err())
            .cloned()
            .collect();
        for id in missing {
            let key = MutationKey::order(id.clone());
            if self.tracker.awaiting_resync(&key).is_some() {
                self.tracker.resolve_resync(&key);
            }
            let terminal = self.base.get(&id).is_some_and(|o| o.status.is_terminal());
            if terminal && self.tracker.pending(&key).is_none() {
                debug!(order_id = %id, "terminal order no longer listed; evicted");
                self.drop_order(&id);
            } else {
                self.refresh_visible(&id);
            }
        }
    }

    fn merge_notifications_snapshot(
        &mut self,
        snap: &NotificationsSnapshot,
        fetched_at_ms: i64,
        effects: &mut Vec<EngineEffect>,
    ) {
        let merge = self.notifications.merge_snapshot(snap, fetched_at_ms);
        for id in merge.confirmed_reads {
            let key = MutationKey::notification(id);
            if let Some(m) = self.tracker.confirm(&key, DesiredState::NotificationRead) {
                effects.push(EngineEffect::MutationConfirmed(m));
            }
        }
        for id in merge.overridden_reads {
            let key = MutationKey::notification(id);
            if let Some(m) = self.tracker.override_pending(&key, fetched_at_ms) {
                effects.push(EngineEffect::MutationOverridden(m));
            }
        }
        for id in merge.resynced_reads {
            self.tracker.resolve_resync(&MutationKey::notification(id));
        }
        for id in merge.evicted {
            self.forget_notification(&id);
        }

        // Rolled-back reads for entries outside the fetched page.
        let settled: Vec<MutationKey> = self
            .tracker
            .all()
            .into_iter()
            .filter(|m| m.entity_type == EntityType::Notification)
            .filter(|m| m.rolled_back_at_ms.is_some_and(|rb| rb <= fetched_at_ms))
            .map(|m| m.key())
            .collect();
        for key in settled {
            self.tracker.resolve_resync(&key);
            self.notifications.settle_read(&key.entity_id);
        }
    }

    /// Apply the result of `GET /orders/{id}`. The overlay is dropped even if
    /// the fetched state is not newer than the mutation.
    pub fn apply_order_resync(&mut self, resync: OrderResync, now_ms: i64) -> ApplyOutcome {
        let mut effects = Vec::new();
        let key = MutationKey::order(resync.order_id.clone());
        let disposition = match resync.order {
            Some(order) => {
                let auth = Authority {
                    ts_ms: order.updated_at_ms,
                    origin: Origin::Poll,
                    covered_at_ms: Some(resync.fetched_at_ms),
                    now_ms,
                };
                let result = self.merge_order(
                    &resync.order_id,
                    OrderChange::Full(order),
                    auth,
                    &mut effects,
                );
                self.tracker.resolve_resync(&key);
                self.refresh_visible(&resync.order_id);
                result.err()
            }
            None => {
                info!(order_id = %resync.order_id, "order unknown to server; removed");
                for m in self.tracker.forget(&key) {
                    effects.push(EngineEffect::MutationOverridden(m));
                }
                self.drop_order(&resync.order_id);
                None
            }
        };
        let changed = self.publish();
        let disposition = disposition.unwrap_or(if changed {
            Disposition::Applied
        } else {
            Disposition::NoChange
        });
        self.outcome(disposition, effects)
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    fn merge_order(
        &mut self,
        id: &str,
        change: OrderChange,
        auth: Authority,
        effects: &mut Vec<EngineEffect>,
    ) -> Result<(), Disposition> {
        let Some(base) = self.base.get(id) else {
            return match change {
                OrderChange::Full(mut order) => {
                    order.updated_at_ms = order.updated_at_ms.max(auth.ts_ms);
                    self.base.insert(id.to_string(), order);
                    if let Some(p) = self.parked.remove(id) {
                        let replay = Authority {
                            ts_ms: p.ts_ms,
                            origin: p.origin,
                            covered_at_ms: None,
                            now_ms: auth.now_ms,
                        };
                        if let Err(d) =
                            self.merge_order(id, OrderChange::Status(p.status), replay, effects)
                        {
                            debug!(order_id = %id, disposition = ?d, "parked status superseded");
                        }
                    }
                    self.settle_order_mutation(id, auth, effects);
                    self.refresh_visible(id);
                    Ok(())
                }
                OrderChange::Status(status) => {
                    self.park(id, status, auth, effects);
                    Err(Disposition::Parked)
                }
            };
        };

        let admitted = admit(base.status, base.updated_at_ms, change.status(), auth.ts_ms, auth.origin);
        if admitted.is_ok() {
            let updated_at_ms = base.updated_at_ms.max(auth.ts_ms);
            let next = match change {
                OrderChange::Full(order) => Order {
                    updated_at_ms: updated_at_ms.max(order.updated_at_ms),
                    ..order
                },
                OrderChange::Status(status) => Order {
                    status,
                    updated_at_ms,
                    ..base.clone()
                },
            };
            self.base.insert(id.to_string(), next);
        }

        // Rollbacks settle once the entity has been covered, accepted or not.
        self.settle_order_mutation(id, auth, effects);
        self.refresh_visible(id);
        admitted
    }

    fn park(&mut self, id: &str, status: OrderStatus, auth: Authority, effects: &mut Vec<EngineEffect>) {
        let replace = match self.parked.get(id) {
            Some(p) => admit(p.status, p.ts_ms, status, auth.ts_ms, auth.origin).is_ok(),
            None => true,
        };
        if !replace {
            return;
        }
        if !self.parked.contains_key(id) {
            if self.parked.len() >= MAX_PARKED {
                let oldest = self
                    .parked
                    .iter()
                    .min_by_key(|(_, p)| p.ts_ms)
                    .map(|(k, _)| k.clone());
                if let Some(k) = oldest {
                    self.parked.remove(&k);
                }
            }
            push_once(
                effects,
                EngineEffect::ResyncOrder {
                    order_id: id.to_string(),
                },
            );
        }
        debug!(order_id = %id, %status, "status for unknown order parked");
        self.parked.insert(
            id.to_string(),
            Parked {
                status,
                ts_ms: auth.ts_ms,
                origin: auth.origin,
            },
        );
    }

    /// Resolve the order's mutation against the current base.
    fn settle_order_mutation(&mut self, id: &str, auth: Authority, effects: &mut Vec<EngineEffect>) {
        let Some(server) = self.base.get(id).map(|o| o.status) else {
            return;
        };
        let key = MutationKey::order(id);

        if let Some(m) = self.tracker.pending(&key).cloned() {
            if let Some(c) = self.tracker.confirm(&key, DesiredState::OrderStatus(server)) {
                info!(order_id = %id, status = %server, mutation_id = c.id, "mutation confirmed");
                effects.push(EngineEffect::MutationConfirmed(c));
            } else if auth.origin == Origin::Poll && auth.ts_ms > m.issued_at_ms {
                if let Some(o) = self.tracker.override_pending(&key, auth.now_ms) {
                    warn!(order_id = %id, status = %server, mutation_id = o.id, "mutation overridden by newer poll");
                    effects.push(EngineEffect::MutationOverridden(o));
                }
            }
            return;
        }

        if let Some(m) = self.tracker.awaiting_resync(&key).cloned() {
            let rolled_back_at = m.rolled_back_at_ms.unwrap_or(m.issued_at_ms);
            let covered = auth.covered_at_ms.is_some_and(|c| c >= rolled_back_at)
                || auth.ts_ms >= rolled_back_at;
            let satisfied = m.desired_status().is_some_and(|want| server.satisfies(want));
            if covered || satisfied {
                debug!(order_id = %id, status = %server, "rolled-back overlay resolved");
                self.tracker.resolve_resync(&key);
            }
        }
    }

    fn refresh_visible(&mut self, id: &str) {
        let Some(base) = self.base.get(id) else {
            self.visible.remove(id);
            return;
        };
        let mut next = base.clone();
        let key = MutationKey::order(id);
        if let Some(status) = self.tracker.overlay(&key).and_then(PendingMutation::desired_status) {
            next.status = status;
        }
        match self.visible.get(id) {
            Some(prev) if prev.same_content(&next) => {}
            Some(prev) => {
                next.version = prev.version + 1;
                self.visible.insert(id.to_string(), next);
            }
            None => {
                next.version = 1;
                self.visible.insert(id.to_string(), next);
            }
        }
    }

    fn drop_order(&mut self, id: &str) {
        self.base.remove(id);
        self.visible.remove(id);
        self.parked.remove(id);
        self.seen.retire(id);
        self.tracker.forget(&MutationKey::order(id));
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    fn ingest_notification(&mut self, event: &ChangeEvent, effects: &mut Vec<EngineEffect>) {
        let had_resync = self.notifications.needs_resync();
        let ingested = self.notifications.ingest(event);

        match &event.payload {
            ChangePayload::NotificationRead => {
                let key = MutationKey::notification(event.entity_id.clone());
                self.notifications.settle_read(&event.entity_id);
                if let Some(m) = self.tracker.confirm(&key, DesiredState::NotificationRead) {
                    effects.push(EngineEffect::MutationConfirmed(m));
                }
                self.tracker.resolve_resync(&key);
            }
            ChangePayload::NotificationRemoved => {
                self.forget_notification(&event.entity_id);
            }
            ChangePayload::NotificationsCleared => {
                let keys: Vec<MutationKey> = self
                    .tracker
                    .all()
                    .into_iter()
                    .filter(|m| m.entity_type == EntityType::Notification)
                    .map(|m| m.key())
                    .collect();
                for key in keys {
                    self.forget_notification(&key.entity_id);
                }
            }
            _ => {}
        }
        for id in ingested.evicted {
            self.forget_notification(&id);
        }

        if !had_resync && self.notifications.needs_resync() {
            push_once(effects, EngineEffect::ResyncNotifications);
        }
    }

    fn forget_notification(&mut self, id: &str) {
        self.seen.retire(id);
        self.tracker.forget(&MutationKey::notification(id));
    }

    // -----------------------------------------------------------------------
    // Optimistic mutations
    // -----------------------------------------------------------------------

    /// Show `desired` immediately and start tracking it. Only a forward move
    /// from the visible status may be issued.
    pub fn issue_order_status(
        &mut self,
        order_id: &str,
        desired: OrderStatus,
        now_ms: i64,
    ) -> Result<IssueOutcome, MutationError> {
        let mut effects = Vec::new();
        let mutation = self.issue_inner_tracked(order_id, desired, now_ms, &mut effects)?;
        self.publish();
        Ok(self.issue_outcome(mutation, effects))
    }

    fn issue_inner(
        &mut self,
        order_id: &str,
        desired: OrderStatus,
        now_ms: i64,
        effects: &mut Vec<EngineEffect>,
    ) -> Result<(), Disposition> {
        self.issue_inner_tracked(order_id, desired, now_ms, effects)
            .map(|_| ())
            .map_err(Disposition::Refused)
    }

    fn issue_inner_tracked(
        &mut self,
        order_id: &str,
        desired: OrderStatus,
        now_ms: i64,
        effects: &mut Vec<EngineEffect>,
    ) -> Result<PendingMutation, MutationError> {
        let key = MutationKey::order(order_id);
        let Some(current) = self.visible.get(order_id) else {
            return Err(MutationError::UnknownEntity { key });
        };
        match classify(current.status, desired) {
            Transition::Forward => {}
            Transition::Unchanged => return Err(MutationError::NoChange { key }),
            transition => {
                return Err(MutationError::IllegalTransition {
                    order_id: order_id.to_string(),
                    from: current.status,
                    to: desired,
                    transition,
                })
            }
        }

        let issued = self
            .tracker
            .issue(key, DesiredState::OrderStatus(desired), now_ms);
        if let Some(prev) = issued.superseded {
            debug!(order_id, mutation_id = prev.id, "mutation superseded");
            effects.push(EngineEffect::MutationSuperseded(prev));
        }
        info!(
            order_id,
            status = %desired,
            mutation_id = issued.mutation.id,
            attempt = issued.mutation.attempt,
            "optimistic status issued"
        );
        self.refresh_visible(order_id);
        Ok(issued.mutation)
    }

    pub fn mark_notification_read(
        &mut self,
        id: &str,
        now_ms: i64,
    ) -> Result<IssueOutcome, MutationError> {
        let mut effects = Vec::new();
        let mutation = self.mark_read_inner(id, now_ms, &mut effects)?;
        self.publish();
        Ok(self.issue_outcome(mutation, effects))
    }

    fn mark_read_inner(
        &mut self,
        id: &str,
        now_ms: i64,
        effects: &mut Vec<EngineEffect>,
    ) -> Result<PendingMutation, MutationError> {
        let key = MutationKey::notification(id);
        match self.notifications.get(id) {
            None => return Err(MutationError::UnknownEntity { key }),
            Some(n) if n.read => return Err(MutationError::NoChange { key }),
            Some(_) => {}
        }
        let issued = self.tracker.issue(key, DesiredState::NotificationRead, now_ms);
        if let Some(prev) = issued.superseded {
            effects.push(EngineEffect::MutationSuperseded(prev));
        }
        self.notifications
            .ingest(&ChangeEvent::notification_read(id, None, now_ms, Origin::Optimistic));
        debug!(notification_id = %id, mutation_id = issued.mutation.id, "optimistic read issued");
        Ok(issued.mutation)
    }

    /// Optimistic read for every unread entry. Returns one outcome per entry.
    pub fn mark_all_notifications_read(&mut self, now_ms: i64) -> Vec<IssueOutcome> {
        let mut issued = Vec::new();
        for id in self.notifications.unread_ids() {
            let mut effects = Vec::new();
            if let Ok(m) = self.mark_read_inner(&id, now_ms, &mut effects) {
                let superseded = effects.into_iter().find_map(|e| match e {
                    EngineEffect::MutationSuperseded(p) => Some(p),
                    _ => None,
                });
                issued.push((m, superseded));
            }
        }
        self.publish();
        issued
            .into_iter()
            .map(|(mutation, superseded)| IssueOutcome {
                mutation,
                superseded,
                epoch: self.epoch,
            })
            .collect()
    }

    /// Server acknowledged a read (REST response).
    pub fn confirm_notification_read(&mut self, id: &str, now_ms: i64) -> ApplyOutcome {
        self.apply(
            ChangeEvent::notification_read(id, None, now_ms, Origin::Poll),
            now_ms,
        )
    }

    pub fn dismiss_notification(&mut self, id: &str, now_ms: i64) -> ApplyOutcome {
        self.apply(
            ChangeEvent {
                entity_id: id.to_string(),
                payload: ChangePayload::NotificationRemoved,
                source_seq: None,
                source_timestamp_ms: now_ms,
                origin: Origin::Optimistic,
            },
            now_ms,
        )
    }

    pub fn clear_notifications(&mut self, now_ms: i64) -> ApplyOutcome {
        self.apply(
            ChangeEvent {
                entity_id: String::new(),
                payload: ChangePayload::NotificationsCleared,
                source_seq: None,
                source_timestamp_ms: now_ms,
                origin: Origin::Optimistic,
            },
            now_ms,
        )
    }

    /// Roll back every mutation whose deadline passed. The overlay stays
    /// visible until the requested resync lands.
    pub fn expire_mutations(&mut self, now_ms: i64) -> ApplyOutcome {
        let mut effects = Vec::new();
        for m in self.tracker.expire(now_ms) {
            self.rolled_back(m, now_ms, &mut effects);
        }
        let changed = self.publish();
        self.outcome(
            if changed {
                Disposition::Applied
            } else {
                Disposition::NoChange
            },
            effects,
        )
    }

    /// Roll back one mutation now, e.g. because its request failed.
    pub fn fail_mutation(&mut self, key: &MutationKey, now_ms: i64) -> ApplyOutcome {
        let mut effects = Vec::new();
        if let Some(m) = self.tracker.roll_back(key, now_ms) {
            self.rolled_back(m, now_ms, &mut effects);
        }
        let changed = self.publish();
        self.outcome(
            if changed {
                Disposition::Applied
            } else {
                Disposition::NoChange
            },
            effects,
        )
    }

    fn rolled_back(&mut self, m: PendingMutation, now_ms: i64, effects: &mut Vec<EngineEffect>) {
        warn!(
            entity_id = %m.entity_id,
            entity_type = ?m.entity_type,
            mutation_id = m.id,
            "mutation rolled back; resync requested"
        );
        let resync = match m.entity_type {
            EntityType::Order => EngineEffect::ResyncOrder {
                order_id: m.entity_id.clone(),
            },
            EntityType::Notification => {
                self.notifications.mark_read_rolled_back(&m.entity_id, now_ms);
                EngineEffect::ResyncNotifications
            }
        };
        effects.push(EngineEffect::MutationRolledBack(m));
        push_once(effects, resync);
    }

    /// The resync for a rolled-back mutation failed; drop its overlay and
    /// leave the entity to the next poll.
    pub fn abandon_resync(&mut self, key: &MutationKey) -> ApplyOutcome {
        if self.tracker.resolve_resync(key).is_some() {
            match key.entity_type {
                EntityType::Order => self.refresh_visible(&key.entity_id),
                EntityType::Notification => self.notifications.abandon_read(&key.entity_id),
            }
        }
        let changed = self.publish();
        self.outcome(
            if changed {
                Disposition::Applied
            } else {
                Disposition::NoChange
            },
            Vec::new(),
        )
    }

    /// Raise or clear the stale-data indicator. Returns `true` if it moved.
    pub fn mark_stale(&mut self, stale: bool) -> bool {
        self.stale = stale;
        self.publish()
    }

    // -----------------------------------------------------------------------
    // Publication
    // -----------------------------------------------------------------------

    /// Build the next state; bump the epoch and swap it in only if it differs.
    fn publish(&mut self) -> bool {
        let view = self.notifications.view();
        let mut next = ReconciledState {
            orders: self.visible.clone(),
            notifications: view.notifications,
            unread_count: view.unread_count,
            epoch: self.epoch,
            stale: self.stale,
            pending_mutations: self.tracker.all(),
        };
        if next == *self.published {
            return false;
        }
        self.epoch += 1;
        next.epoch = self.epoch;
        self.published = Arc::new(next);
        true
    }

    fn outcome(&self, disposition: Disposition, effects: Vec<EngineEffect>) -> ApplyOutcome {
        ApplyOutcome {
            disposition,
            epoch: self.epoch,
            effects,
        }
    }

    fn issue_outcome(&self, mutation: PendingMutation, effects: Vec<EngineEffect>) -> IssueOutcome {
        let superseded = effects.into_iter().find_map(|e| match e {
            EngineEffect::MutationSuperseded(p) => Some(p),
            _ => None,
        });
        IssueOutcome {
            mutation,
            superseded,
            epoch: self.epoch,
        }
    }
}
