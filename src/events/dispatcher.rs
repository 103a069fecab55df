use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::AppResult;
use crate::events::EventProducer;
use crate::store::outbox::OutboxRepository;

const DISPATCH_BATCH_SIZE: usize = 100;

/// Drains the transactional outbox into the event producer.
///
/// Status updates enqueue their events in the same database transaction that
/// commits the status, so a publish failure never loses an event: the row
/// stays unpublished and is retried on the next tick, in insertion order.
pub struct EventDispatcher {
    outbox: OutboxRepository,
    producer: Arc<dyn EventProducer>,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl EventDispatcher {
    pub fn new(
        outbox: OutboxRepository,
        producer: Arc<dyn EventProducer>,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            outbox,
            producer,
            poll_interval,
            shutdown,
        }
    }

    pub fn start(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("📬 Event dispatcher started");
            let mut ticker = tokio::time::interval(self.poll_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.dispatch_once().await {
                            error!("Event dispatch cycle failed: {}", e);
                        }
                    }
                    changed = self.shutdown.changed() => {
                        if changed.is_err() || *self.shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            // Final drain so a clean shutdown does not strand committed events.
            if let Err(e) = self.dispatch_once().await {
                error!("Final event dispatch failed: {}", e);
            }
            info!("📬 Event dispatcher stopped");
        })
    }

    async fn dispatch_once(&self) -> AppResult<()> {
        let pending = self.outbox.load_unpublished(DISPATCH_BATCH_SIZE).await?;
        if pending.is_empty() {
            return Ok(());
        }

        let mut published = Vec::with_capacity(pending.len());
        for row in &pending {
            match self.producer.publish(&row.payload.0).await {
                Ok(()) => published.push(row.id),
                Err(e) => {
                    // Stop at the first failure to keep publish order intact.
                    warn!(
                        event_id = %row.id,
                        topic = %row.topic,
                        "Failed to publish event, will retry: {}", e
                    );
                    break;
                }
            }
        }

        self.outbox.mark_published(&published).await
    }
}
