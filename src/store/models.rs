use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use uuid::Uuid;

use crate::engine::strkey;
use crate::error::{AppError, AppResult, StoreError};

/// Queue status of a payment transaction.
///
/// Transitions form a closed table; anything outside it is a bug in the
/// caller and is rejected, never silently applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "transaction_status", rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Success,
    Error,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Success => "success",
            TransactionStatus::Error => "error",
        }
    }

    /// Return all statuses
    pub fn all() -> Vec<TransactionStatus> {
        vec![
            TransactionStatus::Pending,
            TransactionStatus::Processing,
            TransactionStatus::Success,
            TransactionStatus::Error,
        ]
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Success | TransactionStatus::Error)
    }

    /// Validate a status transition against the closed table:
    /// Pending -> Processing, Processing -> {Success, Error, Pending}.
    pub fn can_transition_to(&self, to: TransactionStatus) -> Result<(), StoreError> {
        let allowed = matches!(
            (self, to),
            (TransactionStatus::Pending, TransactionStatus::Processing)
                | (TransactionStatus::Processing, TransactionStatus::Success)
                | (TransactionStatus::Processing, TransactionStatus::Error)
                | (TransactionStatus::Processing, TransactionStatus::Pending)
        );
        if allowed {
            Ok(())
        } else {
            Err(StoreError::InvalidStatusTransition { from: *self, to })
        }
    }
}

/// Payment kind enum - selects the submission handler for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "transaction_kind", rename_all = "snake_case")]
pub enum TransactionKind {
    /// Channel-signed payment wrapped in a fee bump paid by the distribution account.
    Payment,
    /// Payment submitted as-is, the source account pays its own fee.
    DirectPayment,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Payment => "payment",
            TransactionKind::DirectPayment => "direct_payment",
        }
    }

    pub fn all() -> Vec<TransactionKind> {
        vec![TransactionKind::Payment, TransactionKind::DirectPayment]
    }
}

/// One entry of the append-only status audit trail kept on each transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub status: String,
    pub status_message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub stellar_transaction_hash: Option<String>,
    pub xdr_sent: Option<String>,
    pub xdr_received: Option<String>,
}

/// Payment transaction entity - one row of the durable submission queue
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub external_id: String,
    pub tenant_id: String,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub status_message: Option<String>,
    pub status_history: Json<Vec<StatusHistoryEntry>>,

    pub asset_code: String,
    pub asset_issuer: Option<String>,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub destination: String,
    pub memo: Option<String>,
    pub distribution_account: Option<String>,

    pub channel_account_public_key: Option<String>,
    pub attempts_count: i32,
    pub stellar_transaction_hash: Option<String>,
    pub xdr_sent: Option<String>,
    pub xdr_received: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_until_ledger_number: Option<i32>,
}

impl Transaction {
    /// A row is locked while the network's current ledger number is below
    /// its expiry; once the ledger advances past it the lock is void.
    pub fn is_locked(&self, current_ledger: i32) -> bool {
        match self.locked_until_ledger_number {
            Some(until) => current_ledger < until,
            None => false,
        }
    }

    /// A persisted hash means a previous attempt may have reached the
    /// network; such a job must be queried, never resubmitted blind.
    pub fn needs_reconciliation(&self) -> bool {
        self.stellar_transaction_hash.is_some()
    }

    pub fn asset_is_native(&self) -> bool {
        let issuer_empty = self
            .asset_issuer
            .as_deref()
            .map(|s| s.trim().is_empty())
            .unwrap_or(true);
        issuer_empty
            && (self.asset_code.eq_ignore_ascii_case("XLM")
                || self.asset_code.eq_ignore_ascii_case("native"))
    }

    /// Field-level checks performed before an envelope is built from this row.
    pub fn validate_for_submission(&self) -> AppResult<()> {
        if self.asset_code.is_empty() || self.asset_code.len() > 12 {
            return Err(AppError::InvalidInput(
                "asset code must have between 1 and 12 characters".to_string(),
            ));
        }
        if !self.asset_is_native() {
            let issuer = self.asset_issuer.as_deref().unwrap_or_default();
            if strkey::decode_ed25519_public_key(issuer).is_err() {
                return Err(AppError::InvalidInput(
                    "asset issuer is not a valid ed25519 public key".to_string(),
                ));
            }
        }
        if self.amount <= Decimal::ZERO {
            return Err(AppError::InvalidInput(
                "amount must be positive".to_string(),
            ));
        }
        if strkey::decode_ed25519_public_key(&self.destination).is_err() {
            return Err(AppError::InvalidInput(
                "destination is not a valid ed25519 public key".to_string(),
            ));
        }
        if let Some(memo) = &self.memo {
            if memo.len() > 28 {
                return Err(AppError::InvalidInput(
                    "text memo cannot be longer than 28 bytes".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Input for provisioning a channel account row. The private key is
/// encrypted with the pool passphrase before it ever reaches this struct.
#[derive(Debug, Clone)]
pub struct NewChannelAccount {
    pub public_key: String,
    pub encrypted_private_key: String,
}

/// Channel account entity - a pooled signing identity
#[derive(Debug, Clone, FromRow)]
pub struct ChannelAccount {
    pub public_key: String,
    pub encrypted_private_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_until_ledger_number: Option<i32>,
}

impl ChannelAccount {
    pub fn is_locked(&self, current_ledger: i32) -> bool {
        match self.locked_until_ledger_number {
            Some(until) => current_ledger < until,
            None => false,
        }
    }
}
