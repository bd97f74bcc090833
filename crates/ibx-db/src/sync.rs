//! Configuration lifecycle and per-thread work rows.
//!
//! Work rows are keyed `(config_id, remote_thread_id)`; re-queueing is a
//! status reset on the existing row, never a second row. Every status
//! transition here is guarded by the expected prior status so replays and
//! races collapse to no-ops.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use ibx_schemas::{ConfigStatus, WorkStatus};

#[derive(Debug, Clone)]
pub struct ConfigurationRow {
    pub config_id: Uuid,
    pub status: ConfigStatus,
    pub checkpoint: Option<Value>,
    pub sync_started_at: Option<DateTime<Utc>>,
    pub sync_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn configuration_from_row(row: &sqlx::postgres::PgRow) -> Result<ConfigurationRow> {
    Ok(ConfigurationRow {
        config_id: row.try_get("config_id")?,
        status: ConfigStatus::parse(&row.try_get::<String, _>("status")?)?,
        checkpoint: row.try_get("checkpoint")?,
        sync_started_at: row.try_get("sync_started_at")?,
        sync_completed_at: row.try_get("sync_completed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Create the configuration row in `idle` if it does not exist yet.
pub async fn ensure_configuration(pool: &PgPool, config_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        insert into sync_configurations (config_id, status)
        values ($1, 'idle')
        on conflict (config_id) do nothing
        "#,
    )
    .bind(config_id)
    .execute(pool)
    .await
    .context("ensure_configuration failed")?;
    Ok(())
}

pub async fn fetch_configuration(
    pool: &PgPool,
    config_id: Uuid,
) -> Result<Option<ConfigurationRow>> {
    let row = sqlx::query(
        r#"
        select config_id, status, checkpoint, sync_started_at, sync_completed_at,
               created_at, updated_at
        from sync_configurations
        where config_id = $1
        "#,
    )
    .bind(config_id)
    .fetch_optional(pool)
    .await
    .context("fetch_configuration failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(configuration_from_row(&row)?))
}

/// Enter backfill: stamps `sync_started_at` on first entry only, so a retried
/// job keeps the original start time.
pub async fn begin_backfill(pool: &PgPool, config_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        update sync_configurations
           set status          = 'backfill',
               sync_started_at = coalesce(sync_started_at, now()),
               updated_at      = now()
         where config_id = $1
        "#,
    )
    .bind(config_id)
    .execute(pool)
    .await
    .context("begin_backfill failed")?;
    Ok(())
}

/// Pagination exhausted: backfill → thread_sync.
pub async fn transition_to_thread_sync(pool: &PgPool, config_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        update sync_configurations
           set status = 'thread_sync', updated_at = now()
         where config_id = $1
        "#,
    )
    .bind(config_id)
    .execute(pool)
    .await
    .context("transition_to_thread_sync failed")?;
    Ok(())
}

/// Terminal orchestration failure: status → failed, checkpoint (with the
/// error recorded) preserved for manual restart.
pub async fn mark_config_failed(pool: &PgPool, config_id: Uuid, checkpoint: &Value) -> Result<()> {
    sqlx::query(
        r#"
        update sync_configurations
           set status = 'failed', checkpoint = $2, updated_at = now()
         where config_id = $1
        "#,
    )
    .bind(config_id)
    .bind(checkpoint)
    .execute(pool)
    .await
    .context("mark_config_failed failed")?;
    Ok(())
}

/// Close a configuration. Only fires from an active status; the checkpoint is
/// cleared here and nowhere else.
pub async fn complete_configuration(pool: &PgPool, config_id: Uuid) -> Result<bool> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        update sync_configurations
           set status            = 'completed',
               sync_completed_at = now(),
               checkpoint        = null,
               updated_at        = now()
         where config_id = $1
           and status in ('backfill','thread_sync')
        returning config_id
        "#,
    )
    .bind(config_id)
    .fetch_optional(pool)
    .await
    .context("complete_configuration failed")?;

    Ok(row.is_some())
}

/// Premature-completion recovery edge: completed → thread_sync, completion
/// stamp cleared. Returns false when the configuration moved on meanwhile.
pub async fn revert_premature_completion(pool: &PgPool, config_id: Uuid) -> Result<bool> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        update sync_configurations
           set status            = 'thread_sync',
               sync_completed_at = null,
               updated_at        = now()
         where config_id = $1
           and status = 'completed'
        returning config_id
        "#,
    )
    .bind(config_id)
    .fetch_optional(pool)
    .await
    .context("revert_premature_completion failed")?;

    Ok(row.is_some())
}

/// Persist the backfill checkpoint blob (one atomic jsonb write per page).
pub async fn save_checkpoint(pool: &PgPool, config_id: Uuid, checkpoint: &Value) -> Result<()> {
    sqlx::query(
        r#"
        update sync_configurations
           set checkpoint = $2, updated_at = now()
         where config_id = $1
        "#,
    )
    .bind(config_id)
    .bind(checkpoint)
    .execute(pool)
    .await
    .context("save_checkpoint failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Work rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WorkRow {
    pub job_id: i64,
    pub config_id: Uuid,
    pub remote_thread_id: String,
    pub inbox_id: Uuid,
    pub grant_id: String,
    pub status: WorkStatus,
    pub messages_synced: i32,
    pub last_error: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub pgmq_queued_at: Option<DateTime<Utc>>,
}

fn work_row_from_row(row: &sqlx::postgres::PgRow) -> Result<WorkRow> {
    Ok(WorkRow {
        job_id: row.try_get("job_id")?,
        config_id: row.try_get("config_id")?,
        remote_thread_id: row.try_get("remote_thread_id")?,
        inbox_id: row.try_get("inbox_id")?,
        grant_id: row.try_get("grant_id")?,
        status: WorkStatus::parse(&row.try_get::<String, _>("status")?)?,
        messages_synced: row.try_get("messages_synced")?,
        last_error: row.try_get("last_error")?,
        queued_at: row.try_get("queued_at")?,
        started_at: row.try_get("started_at")?,
        processed_at: row.try_get("processed_at")?,
        pgmq_queued_at: row.try_get("pgmq_queued_at")?,
    })
}

/// Idempotent work-row upsert keyed on `(config_id, remote_thread_id)`.
///
/// A conflict is a re-queue: status resets to `queued`, timestamps and error
/// clear, and the incoming `grant_id` wins only when non-empty — an empty
/// payload grant must never null out a stored credential.
pub async fn upsert_work_row(
    pool: &PgPool,
    config_id: Uuid,
    remote_thread_id: &str,
    inbox_id: Uuid,
    grant_id: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into sync_thread_jobs
            (config_id, remote_thread_id, inbox_id, grant_id, status, queued_at)
        values ($1, $2, $3, $4, 'queued', now())
        on conflict (config_id, remote_thread_id) do update
            set status         = 'queued',
                queued_at      = now(),
                started_at     = null,
                processed_at   = null,
                pgmq_queued_at = null,
                last_error     = null,
                messages_synced = 0,
                grant_id       = case
                                     when excluded.grant_id <> '' then excluded.grant_id
                                     else sync_thread_jobs.grant_id
                                 end
        "#,
    )
    .bind(config_id)
    .bind(remote_thread_id)
    .bind(inbox_id)
    .bind(grant_id)
    .execute(pool)
    .await
    .context("upsert_work_row failed")?;
    Ok(())
}

pub async fn fetch_work_row(
    pool: &PgPool,
    config_id: Uuid,
    remote_thread_id: &str,
) -> Result<Option<WorkRow>> {
    let row = sqlx::query(
        r#"
        select job_id, config_id, remote_thread_id, inbox_id, grant_id, status,
               messages_synced, last_error, queued_at, started_at, processed_at,
               pgmq_queued_at
        from sync_thread_jobs
        where config_id = $1 and remote_thread_id = $2
        "#,
    )
    .bind(config_id)
    .bind(remote_thread_id)
    .fetch_optional(pool)
    .await
    .context("fetch_work_row failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(work_row_from_row(&row)?))
}

/// Claim a work row: queued → processing, stamps `started_at`.
/// Returns false when the row was already claimed or finished (replay).
pub async fn claim_work_row(
    pool: &PgPool,
    config_id: Uuid,
    remote_thread_id: &str,
) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        update sync_thread_jobs
           set status = 'processing', started_at = now()
         where config_id = $1
           and remote_thread_id = $2
           and status = 'queued'
        returning job_id
        "#,
    )
    .bind(config_id)
    .bind(remote_thread_id)
    .fetch_optional(pool)
    .await
    .context("claim_work_row failed")?;

    Ok(row.is_some())
}

/// Terminal success: processing → completed with the synced message count.
pub async fn complete_work_row(
    pool: &PgPool,
    config_id: Uuid,
    remote_thread_id: &str,
    messages_synced: i32,
) -> Result<()> {
    sqlx::query(
        r#"
        update sync_thread_jobs
           set status          = 'completed',
               messages_synced = $3,
               processed_at    = now(),
               last_error      = null
         where config_id = $1
           and remote_thread_id = $2
        "#,
    )
    .bind(config_id)
    .bind(remote_thread_id)
    .bind(messages_synced)
    .execute(pool)
    .await
    .context("complete_work_row failed")?;
    Ok(())
}

/// Terminal failure with diagnostic.
pub async fn fail_work_row(
    pool: &PgPool,
    config_id: Uuid,
    remote_thread_id: &str,
    error: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        update sync_thread_jobs
           set status       = 'failed',
               processed_at = now(),
               last_error   = $3
         where config_id = $1
           and remote_thread_id = $2
        "#,
    )
    .bind(config_id)
    .bind(remote_thread_id)
    .bind(error)
    .execute(pool)
    .await
    .context("fail_work_row failed")?;
    Ok(())
}

/// Stamp `pgmq_queued_at` after the row's job landed on the thread-sync queue.
pub async fn mark_work_row_published(pool: &PgPool, job_id: i64) -> Result<()> {
    sqlx::query(
        r#"
        update sync_thread_jobs
           set pgmq_queued_at = now()
         where job_id = $1
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await
    .context("mark_work_row_published failed")?;
    Ok(())
}

/// All `queued` rows for one configuration, for the bulk publish pass.
pub async fn list_queued_for_config(pool: &PgPool, config_id: Uuid) -> Result<Vec<WorkRow>> {
    let rows = sqlx::query(
        r#"
        select job_id, config_id, remote_thread_id, inbox_id, grant_id, status,
               messages_synced, last_error, queued_at, started_at, processed_at,
               pgmq_queued_at
        from sync_thread_jobs
        where config_id = $1 and status = 'queued'
        order by job_id asc
        "#,
    )
    .bind(config_id)
    .fetch_all(pool)
    .await
    .context("list_queued_for_config failed")?;

    rows.iter().map(work_row_from_row).collect()
}

/// Crash-recovery sweep input: rows inserted but never published
/// (`status = queued` and `pgmq_queued_at IS NULL`), oldest first.
pub async fn list_unpublished_work_rows(pool: &PgPool, limit: i64) -> Result<Vec<WorkRow>> {
    let rows = sqlx::query(
        r#"
        select job_id, config_id, remote_thread_id, inbox_id, grant_id, status,
               messages_synced, last_error, queued_at, started_at, processed_at,
               pgmq_queued_at
        from sync_thread_jobs
        where status = 'queued' and pgmq_queued_at is null
        order by job_id asc
        limit $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("list_unpublished_work_rows failed")?;

    rows.iter().map(work_row_from_row).collect()
}
