//! Production Environment implementation using system time.
//!
//! `SystemEnv` uses the real monotonic clock for timers, tokio for sleeping
//! and the system UTC clock for sample timestamps. Production behavior is
//! therefore not reproducible; tests use the simulation environment instead.

use std::time::Duration;

use chrono::{DateTime, Utc};
use plaza_core::Environment;

/// Production environment using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
