use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::engine::ledger_tracker::LedgerNumberTracker;
use crate::engine::limiter::AdmissionLimiter;
use crate::error::{AppError, AppResult, StoreError};
use crate::store::bundles::BundleRepository;
use crate::submitter::worker::TransactionWorker;

/// Polls the queue, claims job bundles up to the admission limit and fans
/// them out to workers. One scheduler instance per process.
pub struct SubmissionScheduler {
    bundles: BundleRepository,
    ledger_tracker: Arc<dyn LedgerNumberTracker>,
    limiter: Arc<AdmissionLimiter>,
    worker: Arc<TransactionWorker>,
    polling_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl SubmissionScheduler {
    pub fn new(
        bundles: BundleRepository,
        ledger_tracker: Arc<dyn LedgerNumberTracker>,
        limiter: Arc<AdmissionLimiter>,
        worker: Arc<TransactionWorker>,
        polling_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bundles,
            ledger_tracker,
            limiter,
            worker,
            polling_interval,
            shutdown,
        }
    }

    pub fn start(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.polling_interval.as_secs(),
                "🚛 Submission scheduler started"
            );
            let mut ticker = tokio::time::interval(self.polling_interval);
            let mut inflight: JoinSet<()> = JoinSet::new();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.poll_once(&mut inflight).await {
                            error!("Polling cycle failed: {}", e);
                        }
                    }
                    Some(_) = inflight.join_next(), if !inflight.is_empty() => {}
                    changed = self.shutdown.changed() => {
                        if changed.is_err() || *self.shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            // In-flight jobs finish before the process exits; their claims
            // would otherwise sit locked until the ledger horizon passes.
            info!(inflight = inflight.len(), "Draining in-flight jobs");
            while inflight.join_next().await.is_some() {}
            info!("🚛 Submission scheduler stopped");
        })
    }

    async fn poll_once(&self, inflight: &mut JoinSet<()>) -> AppResult<()> {
        let limit = self.limiter.current_limit();
        let (current_ledger, lock_to_ledger) = self.ledger_tracker.get_lock_horizon().await?;

        let bundles = match self
            .bundles
            .claim_and_lock(current_ledger, lock_to_ledger, limit)
            .await
        {
            Ok(bundles) => bundles,
            Err(AppError::Store(StoreError::InsufficientChannelAccounts)) => {
                warn!("No channel accounts free, skipping this cycle");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if bundles.is_empty() {
            return Ok(());
        }

        info!(
            count = bundles.len(),
            limit, current_ledger, "🚚 Claimed job bundles"
        );
        for bundle in bundles {
            let worker = self.worker.clone();
            inflight.spawn(async move {
                worker.process(bundle).await;
            });
        }
        Ok(())
    }
}
