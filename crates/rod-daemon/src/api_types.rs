//! Request and response types for the rod-daemon HTTP endpoints.
//!
//! `Serialize + Deserialize` so tests can decode them. No business logic.

use rod_reconcile::PendingMutation;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
    pub config_hash: String,
    /// Epoch of the currently published state.
    pub epoch: u64,
    pub stale: bool,
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// Body of `POST /v1/orders/:id/status`. Legacy status names are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangeRequest {
    pub status: String,
}

/// 202 body: the optimistic change is visible; the server has not confirmed
/// it yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationAccepted {
    pub mutation: PendingMutation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationsAccepted {
    pub mutations: Vec<PendingMutation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub ok: bool,
}

/// Error body for 400 / 409 / 503.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// "INVALID_STATUS" | "MUTATION_REFUSED" | "SESSION_CLOSED"
    pub code: String,
    pub error: String,
}
