use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::horizon::ErrorClass;

struct LimiterState {
    current_limit: usize,
    indeterminate_count: usize,
    window_started_at: DateTime<Utc>,
}

/// Caps how many jobs a polling cycle may claim.
///
/// A single indeterminate response (timeout, 429, insufficient fee) drops the
/// limit to the configured floor and restarts the observation window. The full
/// pool size comes back only after a whole window passes with fewer
/// indeterminate responses outstanding than the tolerance, so a flapping
/// Horizon cannot bounce the limit up and down on every poll.
pub struct AdmissionLimiter {
    pool_size: usize,
    floor: usize,
    tolerance: usize,
    window: Duration,
    state: Mutex<LimiterState>,
}

impl AdmissionLimiter {
    pub fn new(pool_size: usize, floor: usize, tolerance: usize, window: Duration) -> Self {
        Self {
            pool_size,
            floor: floor.min(pool_size),
            tolerance,
            window,
            state: Mutex::new(LimiterState {
                current_limit: pool_size,
                indeterminate_count: 0,
                window_started_at: Utc::now(),
            }),
        }
    }

    /// Current claim limit, restoring the full pool size when a quiet window
    /// has elapsed.
    pub fn current_limit(&self) -> usize {
        let mut state = self.state.lock();
        if state.current_limit < self.pool_size
            && Utc::now() - state.window_started_at >= self.window
            && state.indeterminate_count < self.tolerance
        {
            state.current_limit = self.pool_size;
            state.indeterminate_count = 0;
            state.window_started_at = Utc::now();
        }
        state.current_limit
    }

    /// Feeds a classified Horizon error back into the limiter.
    pub fn record_response(&self, class: ErrorClass) {
        if class == ErrorClass::Indeterminate {
            let mut state = self.state.lock();
            state.current_limit = self.floor;
            state.indeterminate_count += 1;
            state.window_started_at = Utc::now();
        } else {
            self.record_success();
        }
    }

    /// A response that is not an indeterminate signal counts toward clearing
    /// the throttle.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.indeterminate_count = state.indeterminate_count.saturating_sub(1);
    }
}
