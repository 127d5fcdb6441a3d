use tokio::time::Instant;

/// Wall-clock milliseconds derived from a fixed base plus tokio's monotonic
/// clock, so timers and engine timestamps agree (including under paused time
/// in tests).
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    base_ms: i64,
    start: Instant,
}

impl SessionClock {
    pub fn system() -> Self {
        Self::starting_at(chrono::Utc::now().timestamp_millis())
    }

    pub fn starting_at(base_ms: i64) -> Self {
        Self {
            base_ms,
            start: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.start.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.base_ms.saturating_add(elapsed)
    }
}
