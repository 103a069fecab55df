use std::fmt;

use tracing::{error, info};
use uuid::Uuid;

use crate::store::models::Transaction;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Queue outcomes recorded for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    ProcessingStarted,
    ProcessingSuccessful,
    ProcessingError,
    ReconciliationSuccessful,
    ReconciliationFailure,
}

impl TxOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxOutcome::ProcessingStarted => "processing_started",
            TxOutcome::ProcessingSuccessful => "processing_successful",
            TxOutcome::ProcessingError => "processing_error",
            TxOutcome::ReconciliationSuccessful => "reconciliation_successful",
            TxOutcome::ReconciliationFailure => "reconciliation_failure",
        }
    }
}

impl fmt::Display for TxOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Labels attached to a recorded outcome.
#[derive(Debug, Clone, Default)]
pub struct TxMetadata {
    pub kind: String,
    pub channel_account: Option<String>,
    pub is_horizon_error: bool,
    pub error: Option<String>,
}

pub trait MonitorService: Send + Sync {
    fn record_tx_outcome(&self, outcome: TxOutcome, tx: &Transaction, meta: &TxMetadata);
}

/// Emits outcomes as structured log events, with end-to-end latencies derived
/// from the row's own timestamps.
pub struct TracingMonitorService;

impl TracingMonitorService {
    fn queued_to_completed_ms(tx: &Transaction) -> Option<i64> {
        tx.completed_at
            .map(|done| (done - tx.created_at).num_milliseconds())
    }

    fn started_to_completed_ms(tx: &Transaction) -> Option<i64> {
        match (tx.started_at, tx.completed_at) {
            (Some(started), Some(done)) => Some((done - started).num_milliseconds()),
            _ => None,
        }
    }
}

impl MonitorService for TracingMonitorService {
    fn record_tx_outcome(&self, outcome: TxOutcome, tx: &Transaction, meta: &TxMetadata) {
        // Each recorded outcome is its own event, so it gets its own id.
        let event_id = Uuid::new_v4();
        let queued_ms = Self::queued_to_completed_ms(tx);
        let started_ms = Self::started_to_completed_ms(tx);

        match outcome {
            TxOutcome::ProcessingError | TxOutcome::ReconciliationFailure => {
                error!(
                    event_id = %event_id,
                    outcome = outcome.as_str(),
                    transaction_id = %tx.id,
                    tenant_id = %tx.tenant_id,
                    kind = %meta.kind,
                    channel_account = meta.channel_account.as_deref().unwrap_or("-"),
                    horizon_error = meta.is_horizon_error,
                    detail = meta.error.as_deref().unwrap_or("-"),
                    app_version = APP_VERSION,
                    "📊 Transaction outcome"
                );
            }
            _ => {
                info!(
                    event_id = %event_id,
                    outcome = outcome.as_str(),
                    transaction_id = %tx.id,
                    tenant_id = %tx.tenant_id,
                    kind = %meta.kind,
                    channel_account = meta.channel_account.as_deref().unwrap_or("-"),
                    queued_to_completed_ms = queued_ms,
                    started_to_completed_ms = started_ms,
                    app_version = APP_VERSION,
                    "📊 Transaction outcome"
                );
            }
        }
    }
}

/// Reports infrastructure failures that abort a worker mid-job, leaving the
/// row in its last durable state for a later cycle.
pub trait CrashTracker: Send + Sync {
    fn report(&self, context: &str, detail: &str);
}

pub struct TracingCrashTracker;

impl CrashTracker for TracingCrashTracker {
    fn report(&self, context: &str, detail: &str) {
        error!("🚨 {}: {}", context, detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{TransactionKind, TransactionStatus};
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;
    use sqlx::types::Json;
    use uuid::Uuid;

    fn completed_row() -> Transaction {
        let created = Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            external_id: "payment-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            kind: TransactionKind::Payment,
            status: TransactionStatus::Success,
            status_message: None,
            status_history: Json(vec![]),
            asset_code: "XLM".to_string(),
            asset_issuer: None,
            amount: dec!(10.0),
            destination: "GCV2XK5LVOV2XK5LVOV2XK5LVOV2XK5LVOV2XK5LVOV2XK5LVOV2WIHP".to_string(),
            memo: None,
            distribution_account: None,
            channel_account_public_key: None,
            attempts_count: 1,
            stellar_transaction_hash: None,
            xdr_sent: None,
            xdr_received: None,
            created_at: created,
            updated_at: created,
            started_at: Some(created + Duration::seconds(2)),
            sent_at: Some(created + Duration::seconds(3)),
            completed_at: Some(created + Duration::seconds(5)),
            locked_at: None,
            locked_until_ledger_number: None,
        }
    }

    #[test]
    fn outcome_labels_are_stable() {
        assert_eq!(TxOutcome::ProcessingStarted.as_str(), "processing_started");
        assert_eq!(
            TxOutcome::ReconciliationSuccessful.as_str(),
            "reconciliation_successful"
        );
        assert_eq!(TxOutcome::ProcessingError.to_string(), "processing_error");
    }

    #[test]
    fn latencies_come_from_row_timestamps() {
        let tx = completed_row();
        assert_eq!(TracingMonitorService::queued_to_completed_ms(&tx), Some(5000));
        assert_eq!(TracingMonitorService::started_to_completed_ms(&tx), Some(3000));
    }

    #[test]
    fn latencies_are_absent_until_completion() {
        let mut tx = completed_row();
        tx.completed_at = None;
        assert_eq!(TracingMonitorService::queued_to_completed_ms(&tx), None);
        assert_eq!(TracingMonitorService::started_to_completed_ms(&tx), None);
    }
}
