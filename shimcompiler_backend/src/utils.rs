use std::time::{Duration, Instant};

use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Measures the time between successive ticks.
pub struct TickTimer {
    last: Instant,
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TickTimer {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Time since the previous tick (or construction), restarting the measurement.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let diff = now - self.last;
        self.last = now;
        diff
    }

    pub fn tick_log(&mut self, msg: &str) -> Duration {
        let diff = self.tick();
        debug!(elapsed_us = diff.as_micros() as u64, "{msg}");
        diff
    }

    /// Ticks and warns if the interval exceeded `deadline`. Returns whether it did.
    pub fn tick_deadline(&mut self, msg: &str, deadline: Duration) -> bool {
        let diff = self.tick();
        let overrun = diff > deadline;
        if overrun {
            warn!(
                elapsed_us = diff.as_micros() as u64,
                deadline_us = deadline.as_micros() as u64,
                "{msg}: deadline overrun"
            );
        }
        overrun
    }
}

/// Installs a `tracing` subscriber filtered by `RUST_LOG`, or by `default_directive` when unset.
///
/// Safe to call more than once, later calls are ignored.
pub fn init_tracing(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
