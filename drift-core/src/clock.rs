//! Time source used by folder buffers.

use std::fmt;

use tokio::time::Instant;

/// Monotonic time source. Buffers never read the clock directly so tests can
/// drive the readiness policy deterministically.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// Wall clock backed by tokio's time driver; honours paused test time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
