//! Durable at-least-once job queue.
//!
//! `SqliteJobQueue` mirrors the semantics of a hosted queue: a received
//! message stays invisible for the visibility timeout and carries a receipt
//! handle unique to that delivery; unless it is deleted with that handle it
//! becomes visible again and is redelivered. Messages received
//! `max_receive_count` times without being deleted are parked as
//! dead-lettered.

use crate::{errors::InfraResult, models::media_job::QueueRecord};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{FromRow, SqlitePool};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{debug, warn};
use uuid::Uuid;

/// A message as delivered by [`JobQueue::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub body: String,
    pub attributes: HashMap<String, String>,
    pub receipt_handle: String,
    pub receive_count: i64,
}

impl From<ReceivedMessage> for QueueRecord {
    fn from(message: ReceivedMessage) -> Self {
        Self {
            message_id: Some(message.message_id),
            body: message.body,
            receipt_handle: Some(message.receipt_handle),
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue `body` with string attributes; returns the message id.
    async fn send(&self, body: &str, attributes: &HashMap<String, String>) -> InfraResult<String>;

    /// Up to `max_messages` currently visible messages.
    async fn receive(&self, max_messages: usize) -> InfraResult<Vec<ReceivedMessage>>;

    /// Acknowledge a delivery.
    async fn delete(&self, receipt_handle: &str) -> InfraResult<()>;

    /// Messages not yet acknowledged or dead-lettered.
    async fn depth(&self) -> InfraResult<i64>;
}

#[derive(Debug, FromRow)]
struct MessageRow {
    message_id: String,
    body: String,
    attributes: String,
    receive_count: i64,
}

#[derive(Clone)]
pub struct SqliteJobQueue {
    db: Arc<SqlitePool>,
    visibility_timeout: Duration,
    max_receive_count: i64,
}

impl SqliteJobQueue {
    pub fn new(db: Arc<SqlitePool>, visibility_timeout: Duration, max_receive_count: u32) -> Self {
        Self {
            db,
            visibility_timeout,
            max_receive_count: i64::from(max_receive_count.max(1)),
        }
    }

    fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    #[tracing::instrument(skip(self, body))]
    async fn send(&self, body: &str, attributes: &HashMap<String, String>) -> InfraResult<String> {
        let message_id = Uuid::new_v4().to_string();
        let now = Self::now_millis();
        sqlx::query(
            "INSERT INTO queue_messages (message_id, body, attributes, sent_at, visible_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message_id)
        .bind(body)
        .bind(serde_json::to_string(attributes)?)
        .bind(now)
        .bind(now)
        .execute(&*self.db)
        .await?;
        debug!(message_id, "message enqueued");
        Ok(message_id)
    }

    async fn receive(&self, max_messages: usize) -> InfraResult<Vec<ReceivedMessage>> {
        let now = Self::now_millis();
        let hidden_until = now + self.visibility_timeout.as_millis() as i64;
        let mut tx = self.db.begin().await?;

        let parked = sqlx::query(
            "UPDATE queue_messages SET dead_lettered = 1, receipt_handle = NULL
             WHERE dead_lettered = 0 AND visible_at <= ? AND receive_count >= ?",
        )
        .bind(now)
        .bind(self.max_receive_count)
        .execute(&mut *tx)
        .await?;
        if parked.rows_affected() > 0 {
            warn!(
                count = parked.rows_affected(),
                max_receive_count = self.max_receive_count,
                "messages moved to dead letter"
            );
        }

        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT message_id, body, attributes, receive_count
             FROM queue_messages
             WHERE dead_lettered = 0 AND visible_at <= ?
             ORDER BY sent_at ASC, message_id ASC
             LIMIT ?",
        )
        .bind(now)
        .bind(max_messages as i64)
        .fetch_all(&mut *tx)
        .await?;

        let mut delivered = Vec::with_capacity(rows.len());
        for row in rows {
            let receipt_handle = Uuid::new_v4().to_string();
            sqlx::query(
                "UPDATE queue_messages
                 SET receipt_handle = ?, visible_at = ?, receive_count = receive_count + 1
                 WHERE message_id = ?",
            )
            .bind(&receipt_handle)
            .bind(hidden_until)
            .bind(&row.message_id)
            .execute(&mut *tx)
            .await?;

            delivered.push(ReceivedMessage {
                attributes: serde_json::from_str(&row.attributes)?,
                message_id: row.message_id,
                body: row.body,
                receipt_handle,
                receive_count: row.receive_count + 1,
            });
        }

        tx.commit().await?;
        Ok(delivered)
    }

    async fn delete(&self, receipt_handle: &str) -> InfraResult<()> {
        let result = sqlx::query("DELETE FROM queue_messages WHERE receipt_handle = ?")
            .bind(receipt_handle)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            debug!(receipt_handle, "no message for receipt handle");
        }
        Ok(())
    }

    async fn depth(&self) -> InfraResult<i64> {
        let depth = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM queue_messages WHERE dead_lettered = 0",
        )
        .fetch_one(&*self.db)
        .await?;
        Ok(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn queue(visibility: Duration, max_receive_count: u32) -> SqliteJobQueue {
        SqliteJobQueue::new(Arc::new(db::memory_pool().await), visibility, max_receive_count)
    }

    fn store_attr(store: &str) -> HashMap<String, String> {
        HashMap::from([("storeId".to_string(), store.to_string())])
    }

    #[tokio::test]
    async fn received_messages_are_hidden_until_deleted() {
        let queue = queue(Duration::from_secs(60), 5).await;
        let id = queue.send(r#"{"fileName":"a.jpg"}"#, &store_attr("dc")).await.unwrap();

        let batch = queue.receive(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message_id, id);
        assert_eq!(batch[0].attributes.get("storeId").map(String::as_str), Some("dc"));
        assert_eq!(batch[0].receive_count, 1);

        assert!(queue.receive(10).await.unwrap().is_empty());
        assert_eq!(queue.depth().await.unwrap(), 1);

        queue.delete(&batch[0].receipt_handle).await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unacknowledged_messages_are_redelivered_with_a_new_receipt() {
        let queue = queue(Duration::ZERO, 5).await;
        queue.send("{}", &HashMap::new()).await.unwrap();

        let first = queue.receive(1).await.unwrap();
        let second = queue.receive(1).await.unwrap();
        assert_eq!(first[0].message_id, second[0].message_id);
        assert_ne!(first[0].receipt_handle, second[0].receipt_handle);
        assert_eq!(second[0].receive_count, 2);

        // The stale receipt no longer acknowledges anything.
        queue.delete(&first[0].receipt_handle).await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 1);
        queue.delete(&second[0].receipt_handle).await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn receive_respects_the_batch_limit_in_send_order() {
        let queue = queue(Duration::from_secs(60), 5).await;
        let mut ids = Vec::new();
        for n in 0..3 {
            ids.push(queue.send(&format!("{{\"n\":{}}}", n), &HashMap::new()).await.unwrap());
        }

        let batch = queue.receive(2).await.unwrap();
        assert_eq!(batch.len(), 2);
        let rest = queue.receive(10).await.unwrap();
        assert_eq!(rest.len(), 1);

        let mut seen: Vec<String> = batch.into_iter().chain(rest).map(|m| m.message_id).collect();
        seen.sort();
        ids.sort();
        assert_eq!(seen, ids);
    }

    #[tokio::test]
    async fn messages_past_the_receive_limit_are_dead_lettered() {
        let queue = queue(Duration::ZERO, 2).await;
        queue.send("{}", &HashMap::new()).await.unwrap();

        assert_eq!(queue.receive(1).await.unwrap().len(), 1);
        assert_eq!(queue.receive(1).await.unwrap().len(), 1);
        assert!(queue.receive(1).await.unwrap().is_empty());
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[test]
    fn received_messages_convert_to_batch_records() {
        let record = QueueRecord::from(ReceivedMessage {
            message_id: "m1".into(),
            body: "{}".into(),
            attributes: HashMap::new(),
            receipt_handle: "r1".into(),
            receive_count: 1,
        });
        assert_eq!(record.receipt_handle.as_deref(), Some("r1"));
    }
}
