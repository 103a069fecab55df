use sqlx::PgPool;

use super::channel_accounts::ChannelAccountRepository;
use super::models::{ChannelAccount, Transaction};
use super::transactions::TransactionRepository;
use crate::error::{AppError, AppResult, StoreError};

/// One claimed unit of work: a payment transaction paired with the channel
/// account that will sign this attempt, both locked to the same ledger expiry.
#[derive(Debug, Clone)]
pub struct JobBundle {
    pub transaction: Transaction,
    pub channel_account: ChannelAccount,
    pub locked_until_ledger_number: i32,
}

/// Claims job bundles atomically across the two tables.
pub struct BundleRepository {
    pub pool: PgPool,
    transactions: TransactionRepository,
    channel_accounts: ChannelAccountRepository,
}

impl BundleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            transactions: TransactionRepository::new(pool.clone()),
            channel_accounts: ChannelAccountRepository::new(pool.clone()),
            pool,
        }
    }

    /// Select up to `limit` eligible jobs, pair each with a free channel
    /// account, and lock both sides until `lock_to_ledger`, all in a single
    /// database transaction.
    ///
    /// Eligible means status Pending, or Processing with an expired lock
    /// (a previous worker crashed mid-flight). Row-level locks with
    /// SKIP LOCKED keep concurrent dispatchers from ever pairing the same
    /// account twice. Returns an empty vec when the queue is empty; having
    /// jobs but zero free accounts is an error so the caller can tell
    /// starvation apart from an idle queue.
    pub async fn claim_and_lock(
        &self,
        current_ledger: i32,
        lock_to_ledger: i32,
        limit: usize,
    ) -> AppResult<Vec<JobBundle>> {
        if limit < 1 {
            return Err(AppError::InvalidInput(format!(
                "claim limit must be at least 1, got {}",
                limit
            )));
        }
        if lock_to_ledger <= current_ledger {
            return Err(AppError::InvalidInput(format!(
                "lock expiry ledger {} must be ahead of the current ledger {}",
                lock_to_ledger, current_ledger
            )));
        }

        let mut db_tx = self.pool.begin().await?;

        let eligible = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT id, external_id, tenant_id, kind, status, status_message, status_history,
                   asset_code, asset_issuer, amount, destination, memo, distribution_account,
                   channel_account_public_key, attempts_count, stellar_transaction_hash,
                   xdr_sent, xdr_received, created_at, updated_at, started_at, sent_at,
                   completed_at, locked_at, locked_until_ledger_number
            FROM transactions
            WHERE (locked_until_ledger_number IS NULL OR locked_until_ledger_number <= $1)
              AND status IN ('pending', 'processing')
            ORDER BY updated_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(current_ledger)
        .bind(limit as i64)
        .fetch_all(&mut *db_tx)
        .await?;

        if eligible.is_empty() {
            db_tx.rollback().await?;
            return Ok(Vec::new());
        }

        let free_accounts = sqlx::query_as::<_, ChannelAccount>(
            r#"
            SELECT public_key, encrypted_private_key, created_at, updated_at,
                   locked_at, locked_until_ledger_number
            FROM channel_accounts
            WHERE locked_until_ledger_number IS NULL OR locked_until_ledger_number <= $1
            ORDER BY updated_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(current_ledger)
        .bind(eligible.len() as i64)
        .fetch_all(&mut *db_tx)
        .await?;

        if free_accounts.is_empty() {
            db_tx.rollback().await?;
            return Err(StoreError::InsufficientChannelAccounts.into());
        }

        let mut bundles = Vec::with_capacity(free_accounts.len());
        for (job, account) in eligible.into_iter().zip(free_accounts.into_iter()) {
            let locked_tx = self
                .transactions
                .lock(
                    &mut db_tx,
                    job.id,
                    current_ledger,
                    lock_to_ledger,
                    &account.public_key,
                )
                .await?;
            let locked_account = self
                .channel_accounts
                .lock(&mut db_tx, &account.public_key, current_ledger, lock_to_ledger)
                .await?;

            bundles.push(JobBundle {
                transaction: locked_tx,
                channel_account: locked_account,
                locked_until_ledger_number: lock_to_ledger,
            });
        }

        db_tx.commit().await?;
        Ok(bundles)
    }
}
