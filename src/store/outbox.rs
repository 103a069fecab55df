use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{prelude::FromRow, PgPool, Postgres};
use uuid::Uuid;

use crate::error::AppResult;
use crate::events::Message;

/// One event awaiting delivery. Rows are written in the same database
/// transaction as the status change they announce, so a terminal status
/// and its event are either both durable or neither is.
#[derive(Debug, Clone, FromRow)]
pub struct OutboxRow {
    pub id: Uuid,
    pub topic: String,
    pub message_key: String,
    pub payload: Json<Message>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

pub struct OutboxRepository {
    pub pool: PgPool,
}

impl OutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(
        &self,
        db_tx: &mut sqlx::Transaction<'_, Postgres>,
        message: &Message,
    ) -> AppResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO event_outbox (id, topic, message_key, payload)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id)
        .bind(&message.topic)
        .bind(&message.key)
        .bind(Json(message))
        .execute(&mut **db_tx)
        .await?;

        Ok(id)
    }

    pub async fn load_unpublished(&self, limit: usize) -> AppResult<Vec<OutboxRow>> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, topic, message_key, payload, created_at, published_at
            FROM event_outbox
            WHERE published_at IS NULL
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn mark_published(&self, ids: &[Uuid]) -> AppResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        sqlx::query("UPDATE event_outbox SET published_at = NOW() WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
