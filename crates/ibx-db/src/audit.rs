//! Webhook notification audit rows.
//!
//! One row per notification id; redelivered queue messages update the same
//! row. Terminal states are `processed` and `error`.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// Record (or refresh) the audit row when a notification is consumed.
pub async fn record_notification(
    pool: &PgPool,
    notification_id: Uuid,
    webhook_id: &str,
    inbox_id: Option<Uuid>,
    notification_type: &str,
    grant_id: &str,
    payload: &Value,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into webhook_audit
            (notification_id, webhook_id, inbox_id, notification_type, grant_id, payload)
        values ($1, $2, $3, $4, $5, $6)
        on conflict (notification_id) do update
            set notification_type = excluded.notification_type,
                payload           = excluded.payload
        "#,
    )
    .bind(notification_id)
    .bind(webhook_id)
    .bind(inbox_id)
    .bind(notification_type)
    .bind(grant_id)
    .bind(payload)
    .execute(pool)
    .await
    .context("record_notification failed")?;
    Ok(())
}

pub async fn mark_notification_processed(pool: &PgPool, notification_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        update webhook_audit
           set status = 'processed', processed_at = now(), error = null
         where notification_id = $1
        "#,
    )
    .bind(notification_id)
    .execute(pool)
    .await
    .context("mark_notification_processed failed")?;
    Ok(())
}

/// Terminal failure (payload error or retry exhaustion).
pub async fn mark_notification_error(
    pool: &PgPool,
    notification_id: Uuid,
    error: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        update webhook_audit
           set status = 'error', processed_at = now(), error = $2
         where notification_id = $1
        "#,
    )
    .bind(notification_id)
    .bind(error)
    .execute(pool)
    .await
    .context("mark_notification_error failed")?;
    Ok(())
}
