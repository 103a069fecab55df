use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use super::models::{Transaction, TransactionStatus};
use crate::error::{AppError, AppResult, StoreError};

const TRANSACTION_COLUMNS: &str = r#"
    id, external_id, tenant_id, kind, status, status_message, status_history,
    asset_code, asset_issuer, amount, destination, memo, distribution_account,
    channel_account_public_key, attempts_count, stellar_transaction_hash,
    xdr_sent, xdr_received, created_at, updated_at, started_at, sent_at,
    completed_at, locked_at, locked_until_ledger_number
"#;

/// Transaction repository - the durable submission queue
pub struct TransactionRepository {
    pub pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ========== LOCKING OPERATIONS ==========

    /// Claim one row for processing inside an open database transaction.
    ///
    /// The row must be unlocked relative to `current_ledger` and still in a
    /// non-terminal status; the lock expires once the network ledger reaches
    /// `lock_to_ledger`, so a crashed worker can never starve the queue.
    pub async fn lock(
        &self,
        db_tx: &mut sqlx::Transaction<'_, Postgres>,
        id: Uuid,
        current_ledger: i32,
        lock_to_ledger: i32,
        channel_public_key: &str,
    ) -> AppResult<Transaction> {
        let sql = format!(
            r#"
            UPDATE transactions
            SET status = 'processing',
                locked_at = NOW(),
                locked_until_ledger_number = $3,
                channel_account_public_key = $4,
                started_at = COALESCE(started_at, NOW())
            WHERE id = $1
              AND (locked_until_ledger_number IS NULL OR locked_until_ledger_number <= $2)
              AND status IN ('pending', 'processing')
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        );

        let locked = sqlx::query_as::<_, Transaction>(&sql)
            .bind(id)
            .bind(current_ledger)
            .bind(lock_to_ledger)
            .bind(channel_public_key)
            .fetch_optional(&mut **db_tx)
            .await?
            .ok_or(StoreError::RecordNotFound)?;

        Ok(locked)
    }

    /// Release the ledger lock without touching the status.
    pub async fn unlock(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET locked_at = NULL, locked_until_ledger_number = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RecordNotFound.into());
        }

        Ok(())
    }

    // ========== STATUS OPERATIONS ==========

    /// Apply a status transition after validating it against the closed
    /// transition table, appending a snapshot to the status history.
    pub async fn update_status(
        &self,
        db_tx: &mut sqlx::Transaction<'_, Postgres>,
        id: Uuid,
        to: TransactionStatus,
        status_message: Option<String>,
    ) -> AppResult<Transaction> {
        let select_sql = format!(
            "SELECT {} FROM transactions WHERE id = $1 FOR UPDATE",
            TRANSACTION_COLUMNS
        );
        let current = sqlx::query_as::<_, Transaction>(&select_sql)
            .bind(id)
            .fetch_optional(&mut **db_tx)
            .await?
            .ok_or(StoreError::RecordNotFound)?;

        current.status.can_transition_to(to)?;

        let update_sql = format!(
            r#"
            UPDATE transactions
            SET status = $2,
                status_message = $3,
                completed_at = CASE WHEN $4 THEN NOW() ELSE completed_at END,
                status_history = status_history || jsonb_build_object(
                    'status', $5::text,
                    'status_message', $3::text,
                    'timestamp', NOW(),
                    'stellar_transaction_hash', stellar_transaction_hash,
                    'xdr_sent', xdr_sent,
                    'xdr_received', xdr_received
                )
            WHERE id = $1
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        );

        let updated = sqlx::query_as::<_, Transaction>(&update_sql)
            .bind(id)
            .bind(to)
            .bind(status_message)
            .bind(to.is_terminal())
            .bind(to.as_str())
            .fetch_one(&mut **db_tx)
            .await?;

        Ok(updated)
    }

    /// Push a job whose stored hash never landed on the network back to
    /// Pending, clearing the stale submission artifacts so the next attempt
    /// starts fresh. The pre-reset artifacts are kept in the history.
    pub async fn prepare_for_reprocessing(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = 'pending',
                stellar_transaction_hash = NULL,
                xdr_sent = NULL,
                xdr_received = NULL,
                locked_at = NULL,
                locked_until_ledger_number = NULL,
                status_history = status_history || jsonb_build_object(
                    'status', 'pending',
                    'status_message', 'marked for reprocessing',
                    'timestamp', NOW(),
                    'stellar_transaction_hash', stellar_transaction_hash,
                    'xdr_sent', xdr_sent,
                    'xdr_received', xdr_received
                )
            WHERE id = $1
              AND status IN ('pending', 'processing')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RecordNotFound.into());
        }

        Ok(())
    }

    // ========== SUBMISSION ARTIFACT OPERATIONS ==========

    /// Record the envelope hash and outbound XDR of an attempt.
    ///
    /// Must be committed before the network call goes out: a crash between
    /// submit and response-processing then leaves enough evidence for the
    /// reconciliation path to query instead of resubmitting.
    pub async fn save_hash_and_xdr_sent(
        &self,
        id: Uuid,
        hash: &str,
        envelope_xdr: &str,
        distribution_account: &str,
    ) -> AppResult<Transaction> {
        if hash.len() != 64 {
            return Err(AppError::InvalidInput(format!(
                "transaction hash must have 64 hex characters, got {}",
                hash.len()
            )));
        }

        let sql = format!(
            r#"
            UPDATE transactions
            SET stellar_transaction_hash = $2,
                xdr_sent = $3,
                distribution_account = $4,
                sent_at = NOW(),
                attempts_count = attempts_count + 1,
                status_history = status_history || jsonb_build_object(
                    'status', status::text,
                    'status_message', status_message,
                    'timestamp', NOW(),
                    'stellar_transaction_hash', $2::text,
                    'xdr_sent', $3::text,
                    'xdr_received', xdr_received
                )
            WHERE id = $1
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        );

        let updated = sqlx::query_as::<_, Transaction>(&sql)
            .bind(id)
            .bind(hash)
            .bind(envelope_xdr)
            .bind(distribution_account)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::RecordNotFound)?;

        Ok(updated)
    }

    /// Best-effort capture of the raw network response for audit.
    pub async fn save_xdr_received(&self, id: Uuid, result_xdr: &str) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET xdr_received = $2,
                status_history = status_history || jsonb_build_object(
                    'status', status::text,
                    'status_message', status_message,
                    'timestamp', NOW(),
                    'stellar_transaction_hash', stellar_transaction_hash,
                    'xdr_sent', xdr_sent,
                    'xdr_received', $2::text
                )
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(result_xdr)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RecordNotFound.into());
        }

        Ok(())
    }
}
