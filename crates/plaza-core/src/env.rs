//! Environment abstraction for deterministic testing.
//!
//! Decouples presence logic from system resources (time, sleeping, the wall
//! clock). Production uses real time; the simulation harness uses a virtual
//! clock so reconnection timers can be driven by advancing time explicitly.

use std::{future::Future, ops::Sub, time::Duration};

use chrono::{DateTime, Utc};

/// Abstract environment providing time and async sleeping.
///
/// # Invariants
///
/// Implementations MUST guarantee that `now()` never goes backwards.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, simulation uses a
    /// virtual instant that only moves when the test advances it.
    type Instant: Copy + Ord + Send + Sync + std::fmt::Debug + Sub<Output = Duration>;

    /// Current monotonic time.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code awaits this. State machines never sleep.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Current UTC wall-clock time, used to stamp outbound samples.
    fn wall_clock(&self) -> DateTime<Utc>;
}
