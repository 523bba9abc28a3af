//! Durable event log
//!
//! Every topic is an append-only log in Postgres. A consumer group keeps one committed offset
//! per topic, the offset only moves after the handler ran, so a crash in between redelivers
//! the event (at-least-once)
//!
//! Producers of a topic take turns on a transaction-scoped advisory lock, offsets of a topic
//! become visible in the order they were handed out. A consumer never moves past an offset
//! that is still to be committed.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgConnection;
use sqlx::PgPool;

use crate::events::LifecycleEvent;

use super::Error;
use super::EventConsumer;
use super::EventHandler;
use super::EventProducer;
use super::Result;
use super::decode;
use super::encode;

/// How long an idle consumer waits before looking for new events
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Appends events to a topic
#[derive(Clone)]
pub struct DurableProducer {
    connection_pool: PgPool,
    topic: &'static str,
}

impl DurableProducer {
    /// Producer for `topic`
    pub fn new(connection_pool: PgPool, topic: &'static str) -> Self {
        Self {
            connection_pool,
            topic,
        }
    }
}

#[async_trait]
impl EventProducer for DurableProducer {
    async fn produce(&self, event: &LifecycleEvent) -> Result<()> {
        let payload = encode(event)?;

        let mut transaction = self
            .connection_pool
            .begin()
            .await
            .map_err(connection_error)?;

        append(&mut transaction, self.topic, &payload).await?;

        transaction.commit().await.map_err(connection_error)?;

        Ok(())
    }
}

/// Append a payload to `topic` within the caller's transaction
///
/// Holds the topic lock until the transaction ends
async fn append(connection: &mut PgConnection, topic: &str, payload: &str) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(topic)
        .execute(&mut *connection)
        .await
        .map_err(connection_error)?;

    sqlx::query(
        r"
        INSERT INTO event_log (topic, payload)
        VALUES ($1, $2)
        ",
    )
    .bind(topic)
    .bind(payload)
    .execute(&mut *connection)
    .await
    .map_err(connection_error)?;

    Ok(())
}

/// Reads a topic as a member of a consumer group
///
/// The offset row is locked while an event is handled, members of the same group take turns
/// and events of a topic are handled in order
pub struct DurableConsumer {
    connection_pool: PgPool,
    group_id: String,
    topic: &'static str,
}

impl DurableConsumer {
    /// Consumer of `topic` for group `group_id`
    pub fn new(connection_pool: PgPool, group_id: &str, topic: &'static str) -> Self {
        Self {
            connection_pool,
            group_id: group_id.to_string(),
            topic,
        }
    }
}

#[async_trait]
impl EventConsumer for DurableConsumer {
    async fn consume(&mut self, handler: &dyn EventHandler) -> Result<()> {
        loop {
            let mut transaction = self
                .connection_pool
                .begin()
                .await
                .map_err(connection_error)?;

            sqlx::query(
                r"
                INSERT INTO consumer_offsets (group_id, topic)
                VALUES ($1, $2)
                ON CONFLICT (group_id, topic) DO NOTHING
                ",
            )
            .bind(&self.group_id)
            .bind(self.topic)
            .execute(&mut *transaction)
            .await
            .map_err(connection_error)?;

            let committed = sqlx::query_scalar::<_, i64>(
                r"
                SELECT committed
                FROM consumer_offsets
                WHERE group_id = $1 AND topic = $2
                FOR UPDATE
                ",
            )
            .bind(&self.group_id)
            .bind(self.topic)
            .fetch_one(&mut *transaction)
            .await
            .map_err(connection_error)?;

            let next = sqlx::query_as::<_, (i64, String)>(
                r#"
                SELECT "offset", payload
                FROM event_log
                WHERE topic = $1 AND "offset" > $2
                ORDER BY "offset" ASC
                LIMIT 1
                "#,
            )
            .bind(self.topic)
            .bind(committed)
            .fetch_optional(&mut *transaction)
            .await
            .map_err(connection_error)?;

            let Some((offset, payload)) = next else {
                transaction.rollback().await.map_err(connection_error)?;
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            };

            let decoded = decode(&payload);

            if let Ok(event) = &decoded {
                handler.handle(event.clone()).await;
            }

            sqlx::query(
                r"
                UPDATE consumer_offsets
                SET committed = $3
                WHERE group_id = $1 AND topic = $2
                ",
            )
            .bind(&self.group_id)
            .bind(self.topic)
            .bind(offset)
            .execute(&mut *transaction)
            .await
            .map_err(connection_error)?;

            transaction.commit().await.map_err(connection_error)?;

            tracing::debug!(topic = self.topic, offset, "Committed offset");

            return decoded.map(|_| ());
        }
    }
}

/// Convert `SQLx` to channel connection error
fn connection_error(err: sqlx::Error) -> Error {
    Error::Connection(err.to_string())
}
