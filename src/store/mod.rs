pub mod bundles;
pub mod channel_accounts;
pub mod models;
pub mod outbox;
pub mod transactions;

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use self::bundles::BundleRepository;
use self::channel_accounts::ChannelAccountRepository;
use self::models::{Transaction, TransactionStatus};
use self::outbox::OutboxRepository;
use self::transactions::TransactionRepository;
use crate::error::AppResult;
use crate::events::Message;

/// All repositories over one shared connection pool.
pub struct Store {
    pub pool: PgPool,
    pub transactions: TransactionRepository,
    pub channel_accounts: ChannelAccountRepository,
    pub bundles: BundleRepository,
    pub outbox: OutboxRepository,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self {
            transactions: TransactionRepository::new(pool.clone()),
            channel_accounts: ChannelAccountRepository::new(pool.clone()),
            bundles: BundleRepository::new(pool.clone()),
            outbox: OutboxRepository::new(pool.clone()),
            pool,
        }
    }
}

/// The worker's narrow view of persistence. Production code uses [`Store`];
/// worker tests substitute an in-memory fake.
#[async_trait]
pub trait SubmitterStore: Send + Sync {
    /// Apply a validated status transition. When `event` is given it is
    /// enqueued for delivery in the same database transaction, so the status
    /// and its announcement commit or fail together.
    async fn update_status(
        &self,
        id: Uuid,
        to: TransactionStatus,
        status_message: Option<String>,
        event: Option<&Message>,
    ) -> AppResult<Transaction>;

    async fn save_hash_and_xdr_sent(
        &self,
        id: Uuid,
        hash: &str,
        envelope_xdr: &str,
        distribution_account: &str,
    ) -> AppResult<Transaction>;

    async fn save_xdr_received(&self, id: Uuid, result_xdr: &str) -> AppResult<()>;

    async fn prepare_for_reprocessing(&self, id: Uuid) -> AppResult<()>;

    async fn unlock_transaction(&self, id: Uuid) -> AppResult<()>;

    async fn unlock_channel_account(&self, public_key: &str) -> AppResult<()>;
}

#[async_trait]
impl SubmitterStore for Store {
    async fn update_status(
        &self,
        id: Uuid,
        to: TransactionStatus,
        status_message: Option<String>,
        event: Option<&Message>,
    ) -> AppResult<Transaction> {
        let mut db_tx = self.pool.begin().await?;
        let updated = self
            .transactions
            .update_status(&mut db_tx, id, to, status_message)
            .await?;
        if let Some(message) = event {
            self.outbox.enqueue(&mut db_tx, message).await?;
        }
        db_tx.commit().await?;

        Ok(updated)
    }

    async fn save_hash_and_xdr_sent(
        &self,
        id: Uuid,
        hash: &str,
        envelope_xdr: &str,
        distribution_account: &str,
    ) -> AppResult<Transaction> {
        self.transactions
            .save_hash_and_xdr_sent(id, hash, envelope_xdr, distribution_account)
            .await
    }

    async fn save_xdr_received(&self, id: Uuid, result_xdr: &str) -> AppResult<()> {
        self.transactions.save_xdr_received(id, result_xdr).await
    }

    async fn prepare_for_reprocessing(&self, id: Uuid) -> AppResult<()> {
        self.transactions.prepare_for_reprocessing(id).await
    }

    async fn unlock_transaction(&self, id: Uuid) -> AppResult<()> {
        self.transactions.unlock(id).await
    }

    async fn unlock_channel_account(&self, public_key: &str) -> AppResult<()> {
        self.channel_accounts.unlock(public_key).await
    }
}
