pub mod dispatcher;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::store::models::{Transaction, TransactionStatus};

pub const PAYMENT_COMPLETED_TOPIC: &str = "payments.payment_completed";

/// Envelope published to downstream consumers. The key is the payment's
/// external id so consumers can partition per payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub key: String,
    pub tenant_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCompletedData {
    pub transaction_id: Uuid,
    pub payment_id: String,
    pub payment_status: String,
    pub payment_status_message: Option<String>,
    pub payment_completed_at: DateTime<Utc>,
    pub stellar_transaction_id: Option<String>,
}

impl Message {
    /// Build the completion event for a payment reaching a terminal status.
    pub fn for_payment_completed(
        tx: &Transaction,
        new_status: TransactionStatus,
        status_message: Option<String>,
    ) -> AppResult<Self> {
        let event_type = match new_status {
            TransactionStatus::Success => "payment_completed_success",
            TransactionStatus::Error => "payment_completed_error",
            other => {
                return Err(AppError::Internal(format!(
                    "no completion event for non-terminal status {}",
                    other
                )))
            }
        };

        let data = PaymentCompletedData {
            transaction_id: tx.id,
            payment_id: tx.external_id.clone(),
            payment_status: new_status.as_str().to_string(),
            payment_status_message: status_message,
            payment_completed_at: Utc::now(),
            stellar_transaction_id: tx.stellar_transaction_hash.clone(),
        };

        Ok(Message {
            topic: PAYMENT_COMPLETED_TOPIC.to_string(),
            key: tx.external_id.clone(),
            tenant_id: tx.tenant_id.clone(),
            event_type: event_type.to_string(),
            data: serde_json::to_value(&data)?,
        })
    }
}

/// Transport boundary for domain events. Delivery is at-least-once; callers
/// must persist state before handing a message here.
#[async_trait]
pub trait EventProducer: Send + Sync {
    async fn publish(&self, message: &Message) -> AppResult<()>;
}

/// Producer that writes events to the log. Stands in for a real broker in
/// environments without one; downstream consumers tail the log instead.
pub struct LoggingEventProducer;

#[async_trait]
impl EventProducer for LoggingEventProducer {
    async fn publish(&self, message: &Message) -> AppResult<()> {
        info!(
            "📨 event published: topic={} key={} tenant={} type={} data={}",
            message.topic, message.key, message.tenant_id, message.event_type, message.data
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{TransactionKind, TransactionStatus};
    use rust_decimal_macros::dec;
    use sqlx::types::Json;

    fn completed_row(status: TransactionStatus) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            external_id: "payment-42".to_string(),
            tenant_id: "tenant-1".to_string(),
            kind: TransactionKind::Payment,
            status,
            status_message: None,
            status_history: Json(vec![]),
            asset_code: "XLM".to_string(),
            asset_issuer: None,
            amount: dec!(5),
            destination: "GCV2XK5LVOV2XK5LVOV2XK5LVOV2XK5LVOV2XK5LVOV2XK5LVOV2WIHP".to_string(),
            memo: None,
            distribution_account: None,
            channel_account_public_key: None,
            attempts_count: 1,
            stellar_transaction_hash: Some("ab".repeat(32)),
            xdr_sent: None,
            xdr_received: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            sent_at: None,
            completed_at: None,
            locked_at: None,
            locked_until_ledger_number: None,
        }
    }

    #[test]
    fn builds_success_and_error_events() {
        let tx = completed_row(TransactionStatus::Processing);

        let success =
            Message::for_payment_completed(&tx, TransactionStatus::Success, None).unwrap();
        assert_eq!(success.topic, PAYMENT_COMPLETED_TOPIC);
        assert_eq!(success.key, "payment-42");
        assert_eq!(success.event_type, "payment_completed_success");

        let failure = Message::for_payment_completed(
            &tx,
            TransactionStatus::Error,
            Some("horizon rejected it".to_string()),
        )
        .unwrap();
        assert_eq!(failure.event_type, "payment_completed_error");
        assert_eq!(
            failure.data["payment_status_message"],
            serde_json::json!("horizon rejected it")
        );
        assert_eq!(failure.data["payment_status"], serde_json::json!("error"));
    }

    #[test]
    fn rejects_non_terminal_status() {
        let tx = completed_row(TransactionStatus::Processing);
        assert!(Message::for_payment_completed(&tx, TransactionStatus::Pending, None).is_err());
        assert!(Message::for_payment_completed(&tx, TransactionStatus::Processing, None).is_err());
    }

    #[test]
    fn message_serializes_event_type_as_type() {
        let tx = completed_row(TransactionStatus::Processing);
        let message =
            Message::for_payment_completed(&tx, TransactionStatus::Success, None).unwrap();
        let json = serde_json::to_value(&message).unwrap();
        assert!(json.get("type").is_some());
        assert!(json.get("event_type").is_none());
    }
}
