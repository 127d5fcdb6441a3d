//! rod-session
//!
//! Runtime around the reconciliation engine: REST client, push socket,
//! snapshot poller and the single-writer session task that owns the engine.
//!
//! Everything that touches the network or the clock lives here; the engine
//! itself stays pure.

pub mod api;
pub mod backoff;
mod clock;
pub mod http;
pub mod poller;
pub mod push;
mod session;

pub use api::{ApiError, DashboardApi};
pub use backoff::Backoff;
pub use clock::SessionClock;
pub use http::HttpDashboardApi;
pub use poller::{PollEvent, PollerExit, PollerHandle, PollerSettings, SnapshotPoller};
pub use push::{PushClient, PushEvent, PushExit, PushHandle, PushSettings};
pub use session::{Notice, Session, SessionError, SessionHandle, SessionSettings};
