//! Thread-sync worker.
//!
//! Consumes `thread_sync_jobs`: fetches one thread and all its messages,
//! persists both through the idempotent ingest path, then records the result
//! on the work row and the stats counters. Multiple instances may run in
//! parallel; the unique keys on remote IDs make interleaving safe.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use sqlx::PgPool;
use tracing::{info, warn};

use ibx_config::SyncSettings;
use ibx_db::queue::{self, QueueMessage};
use ibx_provider::EmailProvider;
use ibx_runtime::Shutdown;
use ibx_schemas::{ThreadSyncJob, QUEUE_THREAD_SYNC};

use crate::ingest::{new_thread_from_remote, upsert_message_with_thread};

pub struct ThreadSyncWorker {
    pool: PgPool,
    provider: Arc<dyn EmailProvider>,
    settings: SyncSettings,
    worker_id: usize,
}

impl ThreadSyncWorker {
    pub fn new(
        pool: PgPool,
        provider: Arc<dyn EmailProvider>,
        settings: SyncSettings,
        worker_id: usize,
    ) -> Self {
        Self {
            pool,
            provider,
            settings,
            worker_id,
        }
    }

    pub async fn run(self, mut shutdown: Shutdown) -> Result<()> {
        loop {
            if shutdown.is_triggered() {
                break;
            }
            match self.poll_once(&shutdown).await {
                Ok(0) => {
                    if shutdown
                        .sleep(Duration::from_millis(self.settings.thread_sync_poll_ms))
                        .await
                    {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(component = "thread-sync", worker = self.worker_id, error = %format!("{e:#}"), "poll failed");
                    if shutdown
                        .sleep(Duration::from_millis(self.settings.thread_sync_poll_ms))
                        .await
                    {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Read one batch and process each job. Errors within a thread never
    /// propagate across threads — only the queue read itself can fail here.
    pub async fn poll_once(&self, shutdown: &Shutdown) -> Result<usize> {
        let messages = queue::read_batch(
            &self.pool,
            QUEUE_THREAD_SYNC,
            self.settings.thread_sync_visibility,
            self.settings.thread_sync_batch,
        )
        .await?;

        let n = messages.len();
        for msg in messages {
            if shutdown.is_triggered() {
                break;
            }
            self.handle_message(msg).await;
            if self.settings.thread_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.settings.thread_delay_ms)).await;
            }
        }
        Ok(n)
    }

    /// Process one delivery. All failure handling is internal: a transient
    /// failure leaves the message for redelivery, terminal failures record
    /// and acknowledge.
    pub async fn handle_message(&self, msg: QueueMessage) {
        let job: ThreadSyncJob = match msg.decode() {
            Ok(job) => job,
            Err(e) => {
                warn!(component = "thread-sync", msg_id = msg.msg_id, error = %format!("{e:#}"), "undecodable job dropped");
                self.ack(msg.msg_id).await;
                return;
            }
        };

        if msg.exhausted(self.settings.thread_sync_max_retries) {
            warn!(
                component = "thread-sync",
                thread_id = %job.thread_id,
                read_ct = msg.read_ct,
                "retry limit exceeded; thread marked failed"
            );
            self.finish_failed(&job, "retry limit exceeded").await;
            self.ack(msg.msg_id).await;
            return;
        }

        // Grant resolution: the job payload first, the inbox binding second.
        let grant_id = if job.grant_id.is_empty() {
            match ibx_db::resolve_grant(&self.pool, job.inbox_id).await {
                Ok(Some(g)) => g,
                Ok(None) => {
                    self.finish_failed(&job, "no grant id on job or inbox binding")
                        .await;
                    self.ack(msg.msg_id).await;
                    return;
                }
                Err(e) => {
                    warn!(component = "thread-sync", thread_id = %job.thread_id, error = %format!("{e:#}"), "grant lookup failed");
                    return; // transient; redelivery
                }
            }
        } else {
            job.grant_id.clone()
        };

        // queued → processing on first delivery only; a redelivered job finds
        // the row already processing and proceeds without double-counting.
        match ibx_db::claim_work_row(&self.pool, job.config_id, &job.thread_id).await {
            Ok(true) => {
                if let Err(e) = ibx_db::mark_thread_processing(&self.pool, job.config_id).await {
                    warn!(component = "thread-sync", error = %format!("{e:#}"), "stats update failed");
                }
            }
            Ok(false) => {}
            Err(e) => {
                warn!(component = "thread-sync", thread_id = %job.thread_id, error = %format!("{e:#}"), "claim failed");
                return;
            }
        }

        match self.sync_thread(&job, &grant_id).await {
            Ok(messages_synced) => {
                if let Err(e) = self.finish_completed(&job, messages_synced).await {
                    warn!(component = "thread-sync", thread_id = %job.thread_id, error = %format!("{e:#}"), "completion write failed");
                    return; // leave message; completion path is idempotent
                }
                info!(
                    component = "thread-sync",
                    worker = self.worker_id,
                    config_id = %job.config_id,
                    thread_id = %job.thread_id,
                    messages_synced,
                    "thread synced"
                );
                self.ack(msg.msg_id).await;
            }
            Err(e) => {
                // Transient: visibility timeout redelivers until the retry
                // ceiling terminalizes it above.
                warn!(
                    component = "thread-sync",
                    thread_id = %job.thread_id,
                    read_ct = msg.read_ct,
                    error = %format!("{e:#}"),
                    "thread sync failed; will retry"
                );
            }
        }
    }

    /// Fetch + persist one thread. Returns the remote message count; a thread
    /// missing upstream counts as an empty thread.
    async fn sync_thread(&self, job: &ThreadSyncJob, grant_id: &str) -> Result<i32> {
        let remote_thread = self
            .provider
            .find_thread(grant_id, &job.thread_id)
            .await
            .map_err(|e| anyhow!("thread fetch failed: {e}"))?;

        let Some(remote_thread) = remote_thread else {
            info!(component = "thread-sync", thread_id = %job.thread_id, "thread not found on provider; closing empty");
            return Ok(0);
        };

        let thread_id = ibx_db::upsert_thread(
            &self.pool,
            &new_thread_from_remote(&remote_thread, Some(job.inbox_id)),
        )
        .await?;

        if self.settings.api_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.settings.api_delay_ms)).await;
        }

        let messages = self
            .provider
            .list_messages(grant_id, &job.thread_id, self.settings.max_messages_per_thread)
            .await
            .map_err(|e| anyhow!("message listing failed: {e}"))?;

        let total = messages.len();
        let mut failed = 0usize;
        for message in &messages {
            if let Err(e) = upsert_message_with_thread(&self.pool, thread_id, message).await {
                // An individual message failure never aborts the thread.
                failed += 1;
                warn!(
                    component = "thread-sync",
                    thread_id = %job.thread_id,
                    message_id = %message.id,
                    error = %format!("{e:#}"),
                    "message persist failed"
                );
            }
            if self.settings.message_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.settings.message_delay_ms)).await;
            }
        }
        if failed > 0 {
            warn!(
                component = "thread-sync",
                thread_id = %job.thread_id,
                failed,
                total,
                "thread closed with message failures"
            );
        }

        Ok(total as i32)
    }

    async fn finish_completed(&self, job: &ThreadSyncJob, messages_synced: i32) -> Result<()> {
        ibx_db::complete_work_row(&self.pool, job.config_id, &job.thread_id, messages_synced)
            .await?;
        ibx_db::mark_thread_completed(&self.pool, job.config_id, messages_synced).await?;
        Ok(())
    }

    async fn finish_failed(&self, job: &ThreadSyncJob, reason: &str) {
        if let Err(e) = ibx_db::fail_work_row(&self.pool, job.config_id, &job.thread_id, reason).await
        {
            warn!(component = "thread-sync", error = %format!("{e:#}"), "failure write failed");
        }
        if let Err(e) = ibx_db::mark_thread_failed(&self.pool, job.config_id).await {
            warn!(component = "thread-sync", error = %format!("{e:#}"), "stats update failed");
        }
    }

    async fn ack(&self, msg_id: i64) {
        if let Err(e) = queue::delete_message(&self.pool, QUEUE_THREAD_SYNC, msg_id).await {
            warn!(component = "thread-sync", msg_id, error = %format!("{e:#}"), "queue delete failed");
        }
    }
}
