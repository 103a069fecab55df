use sqlx::{PgPool, Postgres};

use super::models::{ChannelAccount, NewChannelAccount};
use crate::error::{AppResult, StoreError};

const CHANNEL_ACCOUNT_COLUMNS: &str = r#"
    public_key, encrypted_private_key, created_at, updated_at,
    locked_at, locked_until_ledger_number
"#;

/// Channel account repository - the pool of pooled signing identities
pub struct ChannelAccountRepository {
    pub pool: PgPool,
}

impl ChannelAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, public_key: &str) -> AppResult<ChannelAccount> {
        let sql = format!(
            "SELECT {} FROM channel_accounts WHERE public_key = $1",
            CHANNEL_ACCOUNT_COLUMNS
        );
        let account = sqlx::query_as::<_, ChannelAccount>(&sql)
            .bind(public_key)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::RecordNotFound)?;

        Ok(account)
    }

    pub async fn count(&self) -> AppResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM channel_accounts")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Persist freshly generated accounts and lock them in one database
    /// transaction, so they are invisible to the dispatcher until the
    /// on-network creation either succeeds or the rows are rolled back.
    pub async fn insert_and_lock(
        &self,
        accounts: &[NewChannelAccount],
        current_ledger: i32,
        lock_to_ledger: i32,
    ) -> AppResult<Vec<ChannelAccount>> {
        let mut db_tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(accounts.len());

        for account in accounts {
            sqlx::query(
                r#"
                INSERT INTO channel_accounts (public_key, encrypted_private_key)
                VALUES ($1, $2)
                "#,
            )
            .bind(&account.public_key)
            .bind(&account.encrypted_private_key)
            .execute(&mut *db_tx)
            .await?;

            let locked = self
                .lock(&mut db_tx, &account.public_key, current_ledger, lock_to_ledger)
                .await?;
            inserted.push(locked);
        }

        db_tx.commit().await?;
        Ok(inserted)
    }

    /// Lock one free account inside an open database transaction.
    pub async fn lock(
        &self,
        db_tx: &mut sqlx::Transaction<'_, Postgres>,
        public_key: &str,
        current_ledger: i32,
        lock_to_ledger: i32,
    ) -> AppResult<ChannelAccount> {
        let sql = format!(
            r#"
            UPDATE channel_accounts
            SET locked_at = NOW(), locked_until_ledger_number = $3
            WHERE public_key = $1
              AND (locked_until_ledger_number IS NULL OR locked_until_ledger_number <= $2)
            RETURNING {}
            "#,
            CHANNEL_ACCOUNT_COLUMNS
        );

        let locked = sqlx::query_as::<_, ChannelAccount>(&sql)
            .bind(public_key)
            .bind(current_ledger)
            .bind(lock_to_ledger)
            .fetch_optional(&mut **db_tx)
            .await?
            .ok_or(StoreError::RecordNotFound)?;

        Ok(locked)
    }

    /// Claim and lock up to `limit` free accounts, e.g. to retire them.
    pub async fn get_and_lock_all(
        &self,
        current_ledger: i32,
        lock_to_ledger: i32,
        limit: usize,
    ) -> AppResult<Vec<ChannelAccount>> {
        let mut db_tx = self.pool.begin().await?;

        let select_sql = format!(
            r#"
            SELECT {}
            FROM channel_accounts
            WHERE locked_until_ledger_number IS NULL OR locked_until_ledger_number <= $1
            ORDER BY updated_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
            CHANNEL_ACCOUNT_COLUMNS
        );
        let free = sqlx::query_as::<_, ChannelAccount>(&select_sql)
            .bind(current_ledger)
            .bind(limit as i64)
            .fetch_all(&mut *db_tx)
            .await?;

        let mut locked_accounts = Vec::with_capacity(free.len());
        for account in &free {
            let locked = self
                .lock(&mut db_tx, &account.public_key, current_ledger, lock_to_ledger)
                .await?;
            locked_accounts.push(locked);
        }

        db_tx.commit().await?;
        Ok(locked_accounts)
    }

    /// Release the ledger lock immediately, ahead of its natural expiry.
    pub async fn unlock(&self, public_key: &str) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE channel_accounts
            SET locked_at = NULL, locked_until_ledger_number = NULL
            WHERE public_key = $1
            "#,
        )
        .bind(public_key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RecordNotFound.into());
        }

        Ok(())
    }

    pub async fn delete(&self, public_key: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM channel_accounts WHERE public_key = $1")
            .bind(public_key)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RecordNotFound.into());
        }

        Ok(())
    }
}
