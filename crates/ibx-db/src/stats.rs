//! Per-configuration sync counters.
//!
//! Workers apply incremental updates at each work-row transition; the monitor
//! periodically overwrites the counters from a server-side aggregate of the
//! work-row table, which is the authoritative derivation. Decrements use
//! `GREATEST(x-1,0)` so a missed update can never drive a counter negative.
//!
//! `threads_queued` is cumulative (every row ever queued); the number of rows
//! currently waiting is `threads_queued - threads_processing -
//! threads_completed - threads_failed`. `threads_total` stays 0 unless the
//! provider ever reports a page total; progress ratios must divide by
//! `threads_queued`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SyncStatsRow {
    pub config_id: Uuid,
    pub threads_total: i32,
    pub threads_queued: i32,
    pub threads_processing: i32,
    pub threads_completed: i32,
    pub threads_failed: i32,
    pub messages_synced: i32,
    pub sync_started_at: Option<DateTime<Utc>>,
    pub last_thread_at: Option<DateTime<Utc>>,
    pub sync_completed_at: Option<DateTime<Utc>>,
}

/// Create the stats row at backfill start (idempotent).
pub async fn init_stats(pool: &PgPool, config_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        insert into sync_stats (config_id, sync_started_at)
        values ($1, now())
        on conflict (config_id) do nothing
        "#,
    )
    .bind(config_id)
    .execute(pool)
    .await
    .context("init_stats failed")?;
    Ok(())
}

/// Orchestrator: `n` more work rows queued this page.
pub async fn add_threads_queued(pool: &PgPool, config_id: Uuid, n: i32) -> Result<()> {
    sqlx::query(
        r#"
        update sync_stats
           set threads_queued = threads_queued + $2,
               last_thread_at = now(),
               updated_at     = now()
         where config_id = $1
        "#,
    )
    .bind(config_id)
    .bind(n)
    .execute(pool)
    .await
    .context("add_threads_queued failed")?;
    Ok(())
}

/// Worker claimed a thread.
pub async fn mark_thread_processing(pool: &PgPool, config_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        update sync_stats
           set threads_processing = threads_processing + 1,
               updated_at         = now()
         where config_id = $1
        "#,
    )
    .bind(config_id)
    .execute(pool)
    .await
    .context("mark_thread_processing failed")?;
    Ok(())
}

/// Worker finished a thread successfully.
pub async fn mark_thread_completed(
    pool: &PgPool,
    config_id: Uuid,
    messages_synced: i32,
) -> Result<()> {
    sqlx::query(
        r#"
        update sync_stats
           set threads_completed  = threads_completed + 1,
               threads_processing = greatest(threads_processing - 1, 0),
               messages_synced    = messages_synced + $2,
               last_thread_at     = now(),
               updated_at         = now()
         where config_id = $1
        "#,
    )
    .bind(config_id)
    .bind(messages_synced)
    .execute(pool)
    .await
    .context("mark_thread_completed failed")?;
    Ok(())
}

/// Worker failed a thread terminally.
pub async fn mark_thread_failed(pool: &PgPool, config_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        update sync_stats
           set threads_failed     = threads_failed + 1,
               threads_processing = greatest(threads_processing - 1, 0),
               last_thread_at     = now(),
               updated_at         = now()
         where config_id = $1
        "#,
    )
    .bind(config_id)
    .execute(pool)
    .await
    .context("mark_thread_failed failed")?;
    Ok(())
}

pub async fn fetch_stats(pool: &PgPool, config_id: Uuid) -> Result<Option<SyncStatsRow>> {
    let row = sqlx::query(
        r#"
        select config_id, threads_total, threads_queued, threads_processing,
               threads_completed, threads_failed, messages_synced,
               sync_started_at, last_thread_at, sync_completed_at
        from sync_stats
        where config_id = $1
        "#,
    )
    .bind(config_id)
    .fetch_optional(pool)
    .await
    .context("fetch_stats failed")?;

    let Some(row) = row else { return Ok(None) };

    Ok(Some(SyncStatsRow {
        config_id: row.try_get("config_id")?,
        threads_total: row.try_get("threads_total")?,
        threads_queued: row.try_get("threads_queued")?,
        threads_processing: row.try_get("threads_processing")?,
        threads_completed: row.try_get("threads_completed")?,
        threads_failed: row.try_get("threads_failed")?,
        messages_synced: row.try_get("messages_synced")?,
        sync_started_at: row.try_get("sync_started_at")?,
        last_thread_at: row.try_get("last_thread_at")?,
        sync_completed_at: row.try_get("sync_completed_at")?,
    }))
}

// ---------------------------------------------------------------------------
// Monitor derivation
// ---------------------------------------------------------------------------

/// Aggregate of the work-row table for one configuration, computed entirely
/// server-side so a large backfill can never hit a client row limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkRowTally {
    pub queued: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub messages_synced: i64,
}

impl WorkRowTally {
    pub fn total(&self) -> i64 {
        self.queued + self.processing + self.completed + self.failed
    }

    /// The completion predicate: every queued row reached a terminal state,
    /// at least one row exists, and nothing is pending or in flight.
    pub fn is_complete(&self) -> bool {
        self.total() > 0
            && self.queued == 0
            && self.processing == 0
            && self.completed + self.failed >= self.total()
    }
}

pub async fn tally_work_rows(pool: &PgPool, config_id: Uuid) -> Result<WorkRowTally> {
    let row = sqlx::query(
        r#"
        select
            count(*) filter (where status = 'queued')      as queued,
            count(*) filter (where status = 'processing')  as processing,
            count(*) filter (where status = 'completed')   as completed,
            count(*) filter (where status = 'failed')      as failed,
            coalesce(sum(messages_synced) filter (where status = 'completed'), 0)::bigint
                as messages_synced
        from sync_thread_jobs
        where config_id = $1
        "#,
    )
    .bind(config_id)
    .fetch_one(pool)
    .await
    .context("tally_work_rows failed")?;

    Ok(WorkRowTally {
        queued: row.try_get("queued")?,
        processing: row.try_get("processing")?,
        completed: row.try_get("completed")?,
        failed: row.try_get("failed")?,
        messages_synced: row.try_get("messages_synced")?,
    })
}

/// Monitor overwrite: the derived tally replaces the incremental counters.
pub async fn write_derived_stats(
    pool: &PgPool,
    config_id: Uuid,
    tally: &WorkRowTally,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into sync_stats
            (config_id, threads_queued, threads_processing, threads_completed,
             threads_failed, messages_synced, sync_started_at)
        values ($1, $2, $3, $4, $5, $6, now())
        on conflict (config_id) do update
            set threads_queued     = excluded.threads_queued,
                threads_processing = excluded.threads_processing,
                threads_completed  = excluded.threads_completed,
                threads_failed     = excluded.threads_failed,
                messages_synced    = excluded.messages_synced,
                updated_at         = now()
        "#,
    )
    .bind(config_id)
    .bind(tally.total() as i32)
    .bind(tally.processing as i32)
    .bind(tally.completed as i32)
    .bind(tally.failed as i32)
    .bind(tally.messages_synced as i32)
    .execute(pool)
    .await
    .context("write_derived_stats failed")?;
    Ok(())
}

/// Stamp `sync_completed_at` on the stats row when the monitor closes the
/// configuration.
pub async fn stamp_stats_completed(pool: &PgPool, config_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        update sync_stats
           set sync_completed_at = now(), updated_at = now()
         where config_id = $1
        "#,
    )
    .bind(config_id)
    .execute(pool)
    .await
    .context("stamp_stats_completed failed")?;
    Ok(())
}

/// Configurations the monitor must derive stats for.
pub async fn list_active_config_ids(pool: &PgPool) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        select config_id
        from sync_configurations
        where status in ('backfill','thread_sync')
        order by config_id
        "#,
    )
    .fetch_all(pool)
    .await
    .context("list_active_config_ids failed")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Configurations marked completed while work rows are still pending —
/// trigger races or manual interference. Candidates for the recovery edge.
pub async fn list_premature_completions(pool: &PgPool) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        r#"
        select c.config_id
        from sync_configurations c
        where c.status = 'completed'
          and c.sync_started_at is not null
          and exists (
              select 1
              from sync_thread_jobs j
              where j.config_id = c.config_id
                and j.status in ('queued','processing')
          )
        order by c.config_id
        "#,
    )
    .fetch_all(pool)
    .await
    .context("list_premature_completions failed")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tally_is_not_complete() {
        assert!(!WorkRowTally::default().is_complete());
    }

    #[test]
    fn tally_completes_only_when_nothing_pending() {
        let t = WorkRowTally {
            queued: 0,
            processing: 0,
            completed: 3,
            failed: 1,
            messages_synced: 9,
        };
        assert!(t.is_complete());

        let pending = WorkRowTally { queued: 1, ..t };
        assert!(!pending.is_complete());

        let in_flight = WorkRowTally { processing: 1, ..t };
        assert!(!in_flight.is_complete());
    }
}
