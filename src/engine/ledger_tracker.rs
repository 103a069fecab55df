use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::horizon::HorizonClient;

#[async_trait]
pub trait LedgerNumberTracker: Send + Sync {
    /// Latest closed ledger number, possibly served from a short-lived cache.
    async fn get_ledger_number(&self) -> AppResult<i32>;

    /// Pair of (current ledger, lock-until ledger) bounding a claim.
    async fn get_lock_horizon(&self) -> AppResult<(i32, i32)>;
}

struct CachedLedger {
    number: i32,
    fetched_at: Instant,
}

/// Tracks the chain head through Horizon with a bounded-staleness cache, so a
/// burst of claims does not turn into a burst of ledger lookups.
pub struct HorizonLedgerTracker {
    horizon: Arc<dyn HorizonClient>,
    max_age: Duration,
    lock_increment: i32,
    cached: Mutex<Option<CachedLedger>>,
}

impl HorizonLedgerTracker {
    pub fn new(horizon: Arc<dyn HorizonClient>, max_age: Duration, lock_increment: i32) -> Self {
        Self {
            horizon,
            max_age,
            lock_increment,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl LedgerNumberTracker for HorizonLedgerTracker {
    async fn get_ledger_number(&self) -> AppResult<i32> {
        if let Some(cached) = self.cached.lock().as_ref() {
            if cached.fetched_at.elapsed() < self.max_age {
                return Ok(cached.number);
            }
        }

        let number = self.horizon.get_latest_ledger_number().await?;
        if number <= 0 {
            return Err(AppError::Horizon(format!(
                "horizon returned invalid ledger number {}",
                number
            )));
        }
        debug!(ledger = number, "🔭 Refreshed latest ledger number");

        *self.cached.lock() = Some(CachedLedger {
            number,
            fetched_at: Instant::now(),
        });
        Ok(number)
    }

    async fn get_lock_horizon(&self) -> AppResult<(i32, i32)> {
        let current = self.get_ledger_number().await?;
        Ok((current, current + self.lock_increment))
    }
}
