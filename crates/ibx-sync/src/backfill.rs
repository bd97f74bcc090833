//! Backfill orchestrator.
//!
//! Consumes `inbox_backfill_jobs`, paginates the provider's thread listing
//! over a clamped date window, emits idempotent per-thread work rows with a
//! checkpoint after every page, then — once the cursor is exhausted —
//! transitions the configuration to `thread_sync` and bulk-publishes every
//! queued row to `thread_sync_jobs`. The orchestration job is deleted only
//! after all rows are published.
//!
//! Singleton per installation: concurrent orchestrators would duplicate
//! pagination and checkpoint writes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{stream, StreamExt};
use sqlx::PgPool;
use tracing::{info, warn};

use ibx_config::SyncSettings;
use ibx_db::queue::{self, QueueMessage};
use ibx_db::WorkRow;
use ibx_provider::{EmailProvider, ListThreadsQuery};
use ibx_runtime::Shutdown;
use ibx_schemas::{BackfillCheckpoint, BackfillJob, ThreadSyncJob, QUEUE_BACKFILL, QUEUE_THREAD_SYNC};

use crate::window::clamp_backfill_window;

/// Outcome of one orchestration job attempt.
enum JobOutcome {
    /// Pagination finished and every queued row is published; delete the job.
    Done,
    /// Shutdown fired mid-pagination; leave the job for redelivery, the
    /// checkpoint resumes it.
    Interrupted,
}

pub struct BackfillOrchestrator {
    pool: PgPool,
    provider: Arc<dyn EmailProvider>,
    settings: SyncSettings,
}

impl BackfillOrchestrator {
    pub fn new(pool: PgPool, provider: Arc<dyn EmailProvider>, settings: SyncSettings) -> Self {
        Self {
            pool,
            provider,
            settings,
        }
    }

    /// Polling loop. Runs the startup sweep first so work rows orphaned by a
    /// crash between insertion and publication reach the queue again.
    pub async fn run(self, mut shutdown: Shutdown) -> Result<()> {
        match self.sweep_unpublished().await {
            Ok(0) => {}
            Ok(n) => info!(component = "backfill", swept = n, "startup sweep published orphaned work rows"),
            Err(e) => warn!(component = "backfill", error = %format!("{e:#}"), "startup sweep failed"),
        }

        loop {
            if shutdown.is_triggered() {
                break;
            }
            if let Err(e) = self.poll_once(&shutdown).await {
                warn!(component = "backfill", error = %format!("{e:#}"), "poll failed");
            }
            if shutdown
                .sleep(Duration::from_millis(self.settings.backfill_poll_ms))
                .await
            {
                break;
            }
        }
        Ok(())
    }

    /// Read at most one orchestration job and process it to completion.
    pub async fn poll_once(&self, shutdown: &Shutdown) -> Result<usize> {
        let messages = queue::read_batch(
            &self.pool,
            QUEUE_BACKFILL,
            self.settings.backfill_visibility,
            1,
        )
        .await?;

        let n = messages.len();
        for msg in messages {
            self.handle_message(msg, shutdown).await?;
        }
        Ok(n)
    }

    async fn handle_message(&self, msg: QueueMessage, shutdown: &Shutdown) -> Result<()> {
        let job: BackfillJob = match msg.decode() {
            Ok(job) => job,
            Err(e) => {
                // Permanent payload error: nothing to retry.
                warn!(component = "backfill", msg_id = msg.msg_id, error = %format!("{e:#}"), "undecodable job dropped");
                queue::delete_message(&self.pool, QUEUE_BACKFILL, msg.msg_id).await?;
                return Ok(());
            }
        };

        if msg.exhausted(self.settings.backfill_max_retries) {
            warn!(
                component = "backfill",
                config_id = %job.config_id,
                read_ct = msg.read_ct,
                "retry limit exceeded; job dropped, checkpoint preserved for manual restart"
            );
            queue::delete_message(&self.pool, QUEUE_BACKFILL, msg.msg_id).await?;
            return Ok(());
        }

        match self.process_job(&job, shutdown).await {
            Ok(JobOutcome::Done) => {
                queue::delete_message(&self.pool, QUEUE_BACKFILL, msg.msg_id).await?;
                Ok(())
            }
            Ok(JobOutcome::Interrupted) => {
                info!(component = "backfill", config_id = %job.config_id, "interrupted by shutdown; job left for redelivery");
                Ok(())
            }
            Err(e) => {
                let reason = format!("{e:#}");
                warn!(component = "backfill", config_id = %job.config_id, error = %reason, "orchestration failed");

                // Preserve the checkpoint, record the error, let the queue retry.
                let cp = self.load_checkpoint(&job).await.with_error(&reason);
                ibx_db::mark_config_failed(&self.pool, job.config_id, &cp.to_value()).await?;
                Ok(())
            }
        }
    }

    async fn load_checkpoint(&self, job: &BackfillJob) -> BackfillCheckpoint {
        match ibx_db::fetch_configuration(&self.pool, job.config_id).await {
            Ok(Some(cfg)) => BackfillCheckpoint::from_value(cfg.checkpoint.as_ref()),
            _ => BackfillCheckpoint::default(),
        }
    }

    async fn process_job(&self, job: &BackfillJob, shutdown: &Shutdown) -> Result<JobOutcome> {
        let (start, end, clamped) = clamp_backfill_window(job.start_date, job.end_date);
        if clamped {
            warn!(
                component = "backfill",
                config_id = %job.config_id,
                requested_start = %job.start_date,
                adjusted_start = %start,
                "date range exceeds 365 days; start advanced"
            );
        }

        ibx_db::ensure_configuration(&self.pool, job.config_id).await?;
        ibx_db::begin_backfill(&self.pool, job.config_id).await?;
        ibx_db::init_stats(&self.pool, job.config_id).await?;

        let mut checkpoint = self.load_checkpoint(job).await;
        if checkpoint.error.take().is_some() {
            // A retried job resumes from the page cursor; the stale error is
            // dropped so a later failure is not misattributed.
            ibx_db::save_checkpoint(&self.pool, job.config_id, &checkpoint.to_value()).await?;
        }
        if checkpoint.current_page > 0 {
            info!(
                component = "backfill",
                config_id = %job.config_id,
                current_page = checkpoint.current_page,
                "resuming from checkpoint"
            );
        }

        // Short-circuits the per-thread existence probe within this run only.
        let mut seen: HashSet<String> = HashSet::new();
        let mut page_token = checkpoint.last_page_token.clone();

        loop {
            if shutdown.is_triggered() {
                return Ok(JobOutcome::Interrupted);
            }

            let query = ListThreadsQuery {
                limit: self.settings.page_size,
                after_ts: Some(start.timestamp()),
                before_ts: Some(end.timestamp()),
                page_token: page_token.clone(),
            };
            let page = self
                .provider
                .list_threads(&job.grant_id, &query)
                .await
                .map_err(|e| anyhow::anyhow!("thread listing failed: {e}"))?;

            let mut queued_this_page: i32 = 0;
            for thread in &page.data {
                if !seen.insert(thread.id.clone()) {
                    continue;
                }
                if ibx_db::thread_local_id(&self.pool, &thread.id)
                    .await?
                    .is_some()
                {
                    continue;
                }

                ibx_db::upsert_work_row(
                    &self.pool,
                    job.config_id,
                    &thread.id,
                    job.inbox_id,
                    &job.grant_id,
                )
                .await?;
                queued_this_page += 1;
            }

            if queued_this_page > 0 {
                ibx_db::add_threads_queued(&self.pool, job.config_id, queued_this_page).await?;
            }

            checkpoint.current_page += 1;
            checkpoint.threads_queued += i64::from(queued_this_page);
            checkpoint.last_page_token = page.next_cursor.clone();
            ibx_db::save_checkpoint(&self.pool, job.config_id, &checkpoint.to_value()).await?;

            info!(
                component = "backfill",
                config_id = %job.config_id,
                page = checkpoint.current_page,
                queued = queued_this_page,
                "page processed"
            );

            match page.next_cursor {
                Some(token) => page_token = Some(token),
                None => break,
            }

            if self.settings.api_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.settings.api_delay_ms)).await;
            }
        }

        // Cursor exhausted: enter thread_sync, then publish every queued row.
        ibx_db::transition_to_thread_sync(&self.pool, job.config_id).await?;
        let published = self.publish_queued(job.config_id).await?;
        info!(
            component = "backfill",
            config_id = %job.config_id,
            published,
            total_queued = checkpoint.threads_queued,
            "backfill pagination complete"
        );

        Ok(JobOutcome::Done)
    }

    /// Publish every `queued` work row of one configuration in a single pass.
    async fn publish_queued(&self, config_id: uuid::Uuid) -> Result<usize> {
        let rows = ibx_db::list_queued_for_config(&self.pool, config_id).await?;
        let mut published = 0usize;
        for row in &rows {
            if publish_work_row(&self.pool, row).await? {
                published += 1;
            }
        }
        Ok(published)
    }

    /// Startup recovery entry point; see [`sweep_unpublished`].
    pub async fn sweep_unpublished(&self) -> Result<usize> {
        sweep_unpublished(&self.pool, &self.settings).await
    }
}

/// Publish one work row to `thread_sync_jobs`, resolving the grant from
/// the inbox binding when the row's own is empty. A row with no
/// resolvable grant fails permanently instead of being published.
pub async fn publish_work_row(pool: &PgPool, row: &WorkRow) -> Result<bool> {
    let grant_id = if row.grant_id.is_empty() {
        match ibx_db::resolve_grant(pool, row.inbox_id).await? {
            Some(g) => g,
            None => {
                warn!(
                    component = "backfill",
                    config_id = %row.config_id,
                    thread_id = %row.remote_thread_id,
                    "no grant resolvable; work row failed"
                );
                ibx_db::fail_work_row(
                    pool,
                    row.config_id,
                    &row.remote_thread_id,
                    "no grant id on work row or inbox binding",
                )
                .await?;
                ibx_db::mark_thread_failed(pool, row.config_id).await?;
                return Ok(false);
            }
        }
    } else {
        row.grant_id.clone()
    };

    let payload = ThreadSyncJob {
        thread_id: row.remote_thread_id.clone(),
        grant_id,
        inbox_id: row.inbox_id,
        config_id: row.config_id,
    };
    queue::enqueue(pool, QUEUE_THREAD_SYNC, &payload)
        .await
        .context("thread sync publish failed")?;
    ibx_db::mark_work_row_published(pool, row.job_id).await?;
    Ok(true)
}

/// Recovery sweep: publish all work rows inserted but never queued
/// (`status = queued`, `pgmq_queued_at IS NULL`). Rows are fetched in
/// `sweep_batch` chunks and published with `sweep_concurrency` in-flight
/// publishes per chunk. Also reachable via `ibx sweep` for manual recovery.
pub async fn sweep_unpublished(pool: &PgPool, settings: &SyncSettings) -> Result<usize> {
    let concurrency = settings.sweep_concurrency.max(1);
    let mut total = 0usize;
    loop {
        let rows = ibx_db::list_unpublished_work_rows(pool, settings.sweep_batch).await?;
        if rows.is_empty() {
            break;
        }
        let batch_len = rows.len();
        let mut rows_iter = rows.iter();
        let mut inflight = stream::FuturesUnordered::new();
        for row in rows_iter.by_ref().take(concurrency) {
            inflight.push(publish_work_row(pool, row));
        }
        while let Some(published) = inflight.next().await {
            total += usize::from(published?);
            if let Some(row) = rows_iter.next() {
                inflight.push(publish_work_row(pool, row));
            }
        }
        if (batch_len as i64) < settings.sweep_batch {
            break;
        }
    }
    Ok(total)
}
