//! Optimistic mutation tracker.
//!
//! # Lifecycle
//!
//! ```text
//!   issue ──► Pending ──► (confirm)  ──► removed, reported Confirmed
//!                │
//!                ├──────► (override) ──► removed, reported RolledBack
//!                │
//!                └──────► (expire)   ──► RolledBack, awaiting resync ──► resolve_resync / abandon
//! ```
//!
//! At most one mutation per entity is tracked. Issuing again supersedes the
//! previous one (pending or awaiting resync) and bumps `attempt`. Every
//! mutation also carries a process-wide `id`; the session keys its timer tasks
//! on it so a superseded timer is recognisable.
//!
//! The tracker does not touch entity state. The engine reads the desired state
//! from here to build its optimistic overlay.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::status::{OrderStatus, Transition};
use crate::types::EntityType;

pub const DEFAULT_MUTATION_TIMEOUT_MS: i64 = 8_000;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DesiredState {
    OrderStatus(OrderStatus),
    NotificationRead,
}

impl DesiredState {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::OrderStatus(_) => EntityType::Order,
            Self::NotificationRead => EntityType::Notification,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Pending,
    Confirmed,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationKey {
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl MutationKey {
    pub fn order(id: impl Into<String>) -> Self {
        Self {
            entity_type: EntityType::Order,
            entity_id: id.into(),
        }
    }

    pub fn notification(id: impl Into<String>) -> Self {
        Self {
            entity_type: EntityType::Notification,
            entity_id: id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
    pub id: u64,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub desired_state: DesiredState,
    pub issued_at_ms: i64,
    pub deadline_ms: i64,
    /// 1 for the first mutation on an entity, +1 per supersede.
    pub attempt: u32,
    pub status: MutationStatus,
    /// Set when the mutation timed out or its request failed.
    pub rolled_back_at_ms: Option<i64>,
}

impl PendingMutation {
    pub fn key(&self) -> MutationKey {
        MutationKey {
            entity_type: self.entity_type,
            entity_id: self.entity_id.clone(),
        }
    }

    pub fn desired_status(&self) -> Option<OrderStatus> {
        match self.desired_state {
            DesiredState::OrderStatus(s) => Some(s),
            DesiredState::NotificationRead => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issued {
    pub mutation: PendingMutation,
    /// The mutation this one replaced, if any. Its timer must be cancelled.
    pub superseded: Option<PendingMutation>,
}

/// Why an optimistic change was refused before anything was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    UnknownEntity {
        key: MutationKey,
    },
    /// The entity is already in the desired state.
    NoChange {
        key: MutationKey,
    },
    IllegalTransition {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
        transition: Transition,
    },
}

impl fmt::Display for MutationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownEntity { key } => {
                write!(f, "{:?} '{}' is not in the store", key.entity_type, key.entity_id)
            }
            Self::NoChange { key } => write!(
                f,
                "{:?} '{}' is already in the requested state",
                key.entity_type, key.entity_id
            ),
            Self::IllegalTransition {
                order_id, from, to, ..
            } => write!(f, "order '{order_id}' cannot move from {from} to {to}"),
        }
    }
}

impl std::error::Error for MutationError {}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MutationTracker {
    timeout_ms: i64,
    next_id: u64,
    pending: BTreeMap<MutationKey, PendingMutation>,
    /// Timed-out mutations whose entity has not been re-fetched yet.
    awaiting_resync: BTreeMap<MutationKey, PendingMutation>,
    attempts: HashMap<MutationKey, u32>,
}

impl Default for MutationTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MUTATION_TIMEOUT_MS)
    }
}

impl MutationTracker {
    pub fn new(timeout_ms: i64) -> Self {
        Self {
            timeout_ms: timeout_ms.max(1),
            next_id: 1,
            pending: BTreeMap::new(),
            awaiting_resync: BTreeMap::new(),
            attempts: HashMap::new(),
        }
    }

    pub fn timeout_ms(&self) -> i64 {
        self.timeout_ms
    }

    pub fn issue(&mut self, key: MutationKey, desired: DesiredState, now_ms: i64) -> Issued {
        let superseded = self
            .pending
            .remove(&key)
            .or_else(|| self.awaiting_resync.remove(&key));

        let attempt = self.attempts.entry(key.clone()).or_insert(0);
        *attempt += 1;

        let mutation = PendingMutation {
            id: self.next_id,
            entity_id: key.entity_id.clone(),
            entity_type: key.entity_type,
            desired_state: desired,
            issued_at_ms: now_ms,
            deadline_ms: now_ms.saturating_add(self.timeout_ms),
            attempt: *attempt,
            status: MutationStatus::Pending,
            rolled_back_at_ms: None,
        };
        self.next_id += 1;
        self.pending.insert(key, mutation.clone());

        Issued {
            mutation,
            superseded,
        }
    }

    pub fn pending(&self, key: &MutationKey) -> Option<&PendingMutation> {
        self.pending.get(key)
    }

    pub fn awaiting_resync(&self, key: &MutationKey) -> Option<&PendingMutation> {
        self.awaiting_resync.get(key)
    }

    /// Pending mutation, or else the rolled-back one still awaiting resync.
    pub fn overlay(&self, key: &MutationKey) -> Option<&PendingMutation> {
        self.pending(key).or_else(|| self.awaiting_resync(key))
    }

    /// Resolve the pending mutation for `key` if `server` satisfies it.
    pub fn confirm(&mut self, key: &MutationKey, server: DesiredState) -> Option<PendingMutation> {
        let satisfied = match (self.pending.get(key)?.desired_state, server) {
            (DesiredState::OrderStatus(want), DesiredState::OrderStatus(got)) => {
                got.satisfies(want)
            }
            (DesiredState::NotificationRead, DesiredState::NotificationRead) => true,
            _ => false,
        };
        if !satisfied {
            return None;
        }
        let mut m = self.pending.remove(key)?;
        m.status = MutationStatus::Confirmed;
        Some(m)
    }

    /// Drop the pending mutation because newer authoritative state disagrees.
    pub fn override_pending(&mut self, key: &MutationKey, now_ms: i64) -> Option<PendingMutation> {
        let mut m = self.pending.remove(key)?;
        m.status = MutationStatus::RolledBack;
        m.rolled_back_at_ms = Some(now_ms);
        Some(m)
    }

    /// Move a pending mutation to awaiting-resync immediately (its request
    /// failed before the deadline).
    pub fn roll_back(&mut self, key: &MutationKey, now_ms: i64) -> Option<PendingMutation> {
        let mut m = self.pending.remove(key)?;
        m.status = MutationStatus::RolledBack;
        m.rolled_back_at_ms = Some(now_ms);
        self.awaiting_resync.insert(key.clone(), m.clone());
        Some(m)
    }

    /// Roll back every pending mutation whose deadline is at or before
    /// `now_ms`. Repeated calls with the same clock return nothing new.
    pub fn expire(&mut self, now_ms: i64) -> Vec<PendingMutation> {
        let due: Vec<MutationKey> = self
            .pending
            .iter()
            .filter(|(_, m)| m.deadline_ms <= now_ms)
            .map(|(k, _)| k.clone())
            .collect();
        due.iter()
            .filter_map(|k| self.roll_back(k, now_ms))
            .collect()
    }

    pub fn resolve_resync(&mut self, key: &MutationKey) -> Option<PendingMutation> {
        self.awaiting_resync.remove(key)
    }

    /// Forget everything about an entity that left the store.
    pub fn forget(&mut self, key: &MutationKey) -> Vec<PendingMutation> {
        let mut out = Vec::new();
        out.extend(self.pending.remove(key));
        out.extend(self.awaiting_resync.remove(key));
        self.attempts.remove(key);
        out
    }

    pub fn next_deadline_ms(&self) -> Option<i64> {
        self.pending.values().map(|m| m.deadline_ms).min()
    }

    /// Pending then awaiting-resync, in key order.
    pub fn all(&self) -> Vec<PendingMutation> {
        self.pending
            .values()
            .chain(self.awaiting_resync.values())
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.awaiting_resync.is_empty()
    }
}
