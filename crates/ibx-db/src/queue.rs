//! Durable queue substrate over pgmq.
//!
//! Three primitives: enqueue, read (with visibility timeout), delete.
//! A message read but not deleted reappears after the visibility timeout with
//! `read_ct` incremented; consumers decide terminal failure by comparing
//! `read_ct` against their per-role retry ceiling. No ordering guarantee
//! beyond best-effort FIFO — every consumer must be idempotent.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{PgPool, Row};

/// One delivery of a queue message. The payload stays raw JSON; consumers
/// decode it at their parsing boundary and treat decode failure as a
/// permanent payload error (log, delete, continue).
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: DateTime<Utc>,
    pub payload: Value,
}

impl QueueMessage {
    /// Decode the payload into a typed job.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .with_context(|| format!("queue payload decode failed (msg_id={})", self.msg_id))
    }

    /// Deliveries beyond `max_retries + 1` reads are terminal.
    pub fn exhausted(&self, max_retries: i32) -> bool {
        self.read_ct > max_retries
    }
}

/// Publish one payload; returns the pgmq message id.
pub async fn enqueue<T: Serialize>(pool: &PgPool, queue: &str, payload: &T) -> Result<i64> {
    let body = serde_json::to_value(payload).context("queue payload encode failed")?;

    let (msg_id,): (i64,) = sqlx::query_as(
        r#"
        select pgmq.send($1, $2)
        "#,
    )
    .bind(queue)
    .bind(body)
    .fetch_one(pool)
    .await
    .with_context(|| format!("pgmq send failed (queue={queue})"))?;

    Ok(msg_id)
}

/// Read up to `limit` messages, hiding each for `visibility_secs`.
pub async fn read_batch(
    pool: &PgPool,
    queue: &str,
    visibility_secs: i32,
    limit: i32,
) -> Result<Vec<QueueMessage>> {
    let rows = sqlx::query(
        r#"
        select msg_id, read_ct, enqueued_at, message
        from pgmq.read($1, $2, $3)
        "#,
    )
    .bind(queue)
    .bind(visibility_secs)
    .bind(limit)
    .fetch_all(pool)
    .await
    .with_context(|| format!("pgmq read failed (queue={queue})"))?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(QueueMessage {
            msg_id: row.try_get("msg_id")?,
            read_ct: row.try_get("read_ct")?,
            enqueued_at: row.try_get("enqueued_at")?,
            payload: row.try_get("message")?,
        });
    }
    Ok(out)
}

/// Delete a message (terminal acknowledgement). Returns false if the message
/// was already gone — harmless under redelivery races.
pub async fn delete_message(pool: &PgPool, queue: &str, msg_id: i64) -> Result<bool> {
    let (deleted,): (bool,) = sqlx::query_as(
        r#"
        select pgmq.delete($1, $2)
        "#,
    )
    .bind(queue)
    .bind(msg_id)
    .fetch_one(pool)
    .await
    .with_context(|| format!("pgmq delete failed (queue={queue} msg_id={msg_id})"))?;

    Ok(deleted)
}

/// Drop every message in a queue. Operational/test tool, not used by roles.
pub async fn purge(pool: &PgPool, queue: &str) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as(
        r#"
        select pgmq.purge_queue($1)
        "#,
    )
    .bind(queue)
    .fetch_one(pool)
    .await
    .with_context(|| format!("pgmq purge failed (queue={queue})"))?;

    Ok(n)
}

/// Current visible + invisible depth of a queue.
pub async fn queue_length(pool: &PgPool, queue: &str) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as(
        r#"
        select queue_length from pgmq.metrics($1)
        "#,
    )
    .bind(queue)
    .fetch_one(pool)
    .await
    .with_context(|| format!("pgmq metrics failed (queue={queue})"))?;

    Ok(n)
}
