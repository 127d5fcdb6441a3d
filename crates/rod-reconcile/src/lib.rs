//! rod-reconcile
//!
//! Live-state reconciliation core for the restaurant dashboard: orders and
//! notifications fed by push events, REST polls and optimistic user actions.
//!
//! - One canonical event shape ([`ChangeEvent`]) produced by the normalizer.
//! - One writer ([`ReconciliationEngine`]) that owns the state and publishes
//!   an immutable [`ReconciledState`] with a monotonic `epoch`.
//! - Optimistic mutations are commands with a compensating resync, not flag
//!   flips.
//!
//! Deterministic, pure logic. No IO. No clock. No async.

mod dedupe;
mod engine;
mod event;
mod mutation;
pub mod normalizer;
mod notifications;
mod snapshot;
mod status;
mod types;
mod watermark;

pub use dedupe::{SeenEvents, RETIRED_WINDOW, SEQ_WINDOW};
pub use engine::{
    ApplyOutcome, Disposition, EngineConfig, EngineEffect, IssueOutcome, ReconciliationEngine,
    SnapshotOutcome,
};
pub use event::{ChangeEvent, ChangeKind, ChangePayload, UNREAD_COUNT_ENTITY};
pub use mutation::{
    DesiredState, Issued, MutationError, MutationKey, MutationStatus, MutationTracker,
    PendingMutation, DEFAULT_MUTATION_TIMEOUT_MS,
};
pub use normalizer::{normalize_push, MalformedEvent, PushChannel};
pub use notifications::{
    Ingested, NotificationAggregator, NotificationView, SnapshotMerge, DEFAULT_RETAINED_CAP,
};
pub use snapshot::{NotificationsSnapshot, OrderResync, OrdersSnapshot, Snapshot};
pub use status::{classify, OrderStatus, Transition, UnknownStatus};
pub use types::*;
pub use watermark::{SnapshotFreshness, SnapshotWatermark};
