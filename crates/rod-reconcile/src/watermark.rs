//! Snapshot monotonicity watermark.
//!
//! # Purpose
//!
//! Polls overlap: a slow `GET /orders` issued before a faster one can land
//! after it. This module tracks the **fetch timestamp** of the last accepted
//! snapshot for one scope (orders or notifications) and rejects any snapshot
//! whose timestamp is older than that watermark.
//!
//! # Invariants
//!
//! - **Non-decreasing**: a snapshot is accepted only if its `fetched_at_ms`
//!   is >= the last accepted `fetched_at_ms`.
//! - **No timestamp is stale**: `fetched_at_ms <= 0` is always rejected.
//! - **Advances only on acceptance**: rejections do not move the watermark.

// ---------------------------------------------------------------------------
// Freshness decision
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotFreshness {
    /// Timestamp is >= the watermark.
    Fresh,

    /// Timestamp is strictly older than the last accepted snapshot.
    Stale {
        /// Last accepted `fetched_at_ms`.
        watermark_ms: i64,
        got_ms: i64,
    },

    /// Snapshot carried no usable timestamp.
    NoTimestamp,
}

impl SnapshotFreshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, SnapshotFreshness::Fresh)
    }
}

// ---------------------------------------------------------------------------
// Watermark
// ---------------------------------------------------------------------------

/// Last accepted snapshot timestamp for one scope.
///
/// Call [`accept`][SnapshotWatermark::accept] on each incoming snapshot and
/// only merge it when the result is [`SnapshotFreshness::Fresh`].
/// [`check`][SnapshotWatermark::check] probes without advancing.
#[derive(Clone, Debug)]
pub struct SnapshotWatermark {
    /// Starts at `i64::MIN` so any positive timestamp is fresh.
    last_accepted_ms: i64,
}

impl Default for SnapshotWatermark {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotWatermark {
    pub fn new() -> Self {
        Self {
            last_accepted_ms: i64::MIN,
        }
    }

    pub fn check(&self, fetched_at_ms: i64) -> SnapshotFreshness {
        if fetched_at_ms <= 0 {
            return SnapshotFreshness::NoTimestamp;
        }
        if fetched_at_ms < self.last_accepted_ms {
            return SnapshotFreshness::Stale {
                watermark_ms: self.last_accepted_ms,
                got_ms: fetched_at_ms,
            };
        }
        SnapshotFreshness::Fresh
    }

    pub fn accept(&mut self, fetched_at_ms: i64) -> SnapshotFreshness {
        let result = self.check(fetched_at_ms);
        if result.is_fresh() {
            self.last_accepted_ms = fetched_at_ms;
        }
        result
    }

    /// `i64::MIN` until the first acceptance.
    pub fn last_accepted_ms(&self) -> i64 {
        self.last_accepted_ms
    }

    pub fn has_accepted_any(&self) -> bool {
        self.last_accepted_ms > i64::MIN
    }
}
