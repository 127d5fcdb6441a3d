//! Order status state machine.
//!
//! # State diagram
//!
//! ```text
//!   Received ──► Preparing ──► Ready ──► Completed (term.)
//!      │             │
//!      └─────────────┴──────► Cancelled (term.)
//! ```
//!
//! Every status string entering the system goes through [`OrderStatus::parse`]
//! at ingestion, whichever channel it came from, so a poll-derived and a
//! push-derived copy of the same order always carry the same canonical value.
//!
//! [`classify`] decides the direction of a proposed move. Skipping stages is
//! `Forward` (intermediate pushes may have been lost). Leaving a terminal state,
//! moving to an earlier stage, or cancelling after `Ready` is never forward.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// OrderStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Received,
    Preparing,
    Ready,
    /// **Terminal.**
    Completed,
    /// **Terminal.** Reachable from `Received` or `Preparing` only.
    Cancelled,
}

/// A status string that maps to no known status, legacy or current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus {
    pub raw: String,
}

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognised order status '{}'", self.raw)
    }
}

impl std::error::Error for UnknownStatus {}

impl OrderStatus {
    /// Canonicalise a raw status string, legacy aliases included.
    pub fn parse(raw: &str) -> Result<Self, UnknownStatus> {
        match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "new" | "pending" | "placed" | "received" | "accepted" => Ok(Self::Received),
            "preparing" | "in_progress" | "cooking" | "processing" => Ok(Self::Preparing),
            "ready" | "ready_for_pickup" => Ok(Self::Ready),
            "completed" | "complete" | "delivered" | "done" | "served" => Ok(Self::Completed),
            "cancelled" | "canceled" | "rejected" | "void" => Ok(Self::Cancelled),
            _ => Err(UnknownStatus {
                raw: raw.to_string(),
            }),
        }
    }

    /// Wire form sent back to the server in `POST /orders/{id}/status`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    fn stage(&self) -> u8 {
        match self {
            Self::Received => 0,
            Self::Preparing => 1,
            Self::Ready => 2,
            Self::Completed | Self::Cancelled => 3,
        }
    }

    /// `true` when an order currently in `self` already satisfies a request to
    /// move it to `desired`: it is there, or it has moved past it.
    pub fn satisfies(&self, desired: OrderStatus) -> bool {
        *self == desired || classify(desired, *self) == Transition::Forward
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Forward,
    Backward,
    /// Not a move the state machine permits in either direction
    /// (e.g. `Ready → Cancelled`, `Completed → Cancelled`).
    Illegal,
}

impl Transition {
    /// Moves an unordered push channel may apply.
    pub fn is_monotonic(&self) -> bool {
        matches!(self, Self::Unchanged | Self::Forward)
    }
}

pub fn classify(from: OrderStatus, to: OrderStatus) -> Transition {
    use OrderStatus::*;

    if from == to {
        return Transition::Unchanged;
    }
    match (from, to) {
        (Received | Preparing, Cancelled) => Transition::Forward,
        (Ready | Completed, Cancelled) | (Cancelled, Completed) => Transition::Illegal,
        _ if from.is_terminal() => Transition::Backward,
        _ if to.stage() > from.stage() => Transition::Forward,
        _ => Transition::Backward,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::OrderStatus::*;
    use super::*;

    #[test]
    fn legacy_new_normalizes_to_received() {
        assert_eq!(OrderStatus::parse("new").unwrap(), Received);
        assert_eq!(OrderStatus::parse(" NEW ").unwrap(), Received);
        assert_eq!(OrderStatus::parse("In-Progress").unwrap(), Preparing);
        assert_eq!(OrderStatus::parse("canceled").unwrap(), Cancelled);
        assert!(OrderStatus::parse("teleported").is_err());
    }

    #[test]
    fn happy_path_is_forward() {
        assert_eq!(classify(Received, Preparing), Transition::Forward);
        assert_eq!(classify(Preparing, Ready), Transition::Forward);
        assert_eq!(classify(Ready, Completed), Transition::Forward);
        assert_eq!(classify(Received, Ready), Transition::Forward);
    }

    #[test]
    fn backward_moves_are_detected() {
        assert_eq!(classify(Ready, Preparing), Transition::Backward);
        assert_eq!(classify(Completed, Ready), Transition::Backward);
        assert_eq!(classify(Cancelled, Received), Transition::Backward);
    }

    #[test]
    fn cancel_only_before_ready() {
        assert_eq!(classify(Received, Cancelled), Transition::Forward);
        assert_eq!(classify(Preparing, Cancelled), Transition::Forward);
        assert_eq!(classify(Ready, Cancelled), Transition::Illegal);
        assert_eq!(classify(Completed, Cancelled), Transition::Illegal);
        assert_eq!(classify(Cancelled, Completed), Transition::Illegal);
    }

    #[test]
    fn satisfies_accepts_later_states() {
        assert!(Ready.satisfies(Ready));
        assert!(Completed.satisfies(Ready));
        assert!(!Preparing.satisfies(Ready));
        assert!(Cancelled.satisfies(Preparing));
    }

    #[test]
    fn as_str_round_trips_through_parse() {
        for s in [Received, Preparing, Ready, Completed, Cancelled] {
            assert_eq!(OrderStatus::parse(s.as_str()).unwrap(), s);
        }
    }
}
