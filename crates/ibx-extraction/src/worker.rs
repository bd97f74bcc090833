//! Extraction worker.
//!
//! Consumes `extraction_jobs`: loads the thread's messages chronologically,
//! composes a transcript, calls the LLM with the fixed extraction schema, and
//! persists the versioned record plus entity rows. Multiple instances may run
//! in parallel; record inserts are idempotent on `(thread_id, version)`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use sqlx::PgPool;
use tracing::{info, warn};

use ibx_config::SyncSettings;
use ibx_db::queue::{self, QueueMessage};
use ibx_db::NewExtraction;
use ibx_llm::{GenerateOptions, LlmClient, ThreadExtraction};
use ibx_runtime::Shutdown;
use ibx_schemas::{ExtractionJob, QUEUE_EXTRACTION};

use crate::transcript::{compose_transcript, extraction_prompt};

pub struct ExtractionWorker {
    pool: PgPool,
    llm: Arc<dyn LlmClient>,
    settings: SyncSettings,
    worker_id: usize,
}

impl ExtractionWorker {
    pub fn new(
        pool: PgPool,
        llm: Arc<dyn LlmClient>,
        settings: SyncSettings,
        worker_id: usize,
    ) -> Self {
        Self {
            pool,
            llm,
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
                        .sleep(Duration::from_millis(self.settings.extraction_poll_ms))
                        .await
                    {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(component = "extraction", worker = self.worker_id, error = %format!("{e:#}"), "poll failed");
                    if shutdown
                        .sleep(Duration::from_millis(self.settings.extraction_poll_ms))
                        .await
                    {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn poll_once(&self, shutdown: &Shutdown) -> Result<usize> {
        let messages = queue::read_batch(
            &self.pool,
            QUEUE_EXTRACTION,
            self.settings.extraction_visibility,
            1,
        )
        .await?;

        let n = messages.len();
        for msg in messages {
            if shutdown.is_triggered() {
                break;
            }
            self.handle_message(msg).await;
        }
        Ok(n)
    }

    pub async fn handle_message(&self, msg: QueueMessage) {
        let job: ExtractionJob = match msg.decode() {
            Ok(job) => job,
            Err(e) => {
                warn!(component = "extraction", msg_id = msg.msg_id, error = %format!("{e:#}"), "undecodable job dropped");
                self.ack(msg.msg_id).await;
                return;
            }
        };

        if msg.exhausted(self.settings.extraction_max_retries) {
            warn!(
                component = "extraction",
                thread_id = %job.thread_id,
                read_ct = msg.read_ct,
                "retry limit exceeded; extraction marked failed"
            );
            if let Err(e) =
                ibx_db::tracking_mark_failed(&self.pool, job.thread_id, "retry limit exceeded")
                    .await
            {
                warn!(component = "extraction", error = %format!("{e:#}"), "tracking write failed");
            }
            self.ack(msg.msg_id).await;
            return;
        }

        if let Err(e) = ibx_db::tracking_mark_processing(&self.pool, job.thread_id).await {
            warn!(component = "extraction", error = %format!("{e:#}"), "tracking write failed");
        }

        match self.extract(&job).await {
            Ok(()) => {
                if let Err(e) = ibx_db::tracking_mark_completed(&self.pool, job.thread_id).await {
                    warn!(component = "extraction", error = %format!("{e:#}"), "tracking write failed");
                }
                info!(
                    component = "extraction",
                    worker = self.worker_id,
                    thread_id = %job.thread_id,
                    "thread extracted"
                );
                self.ack(msg.msg_id).await;
            }
            Err(e) => {
                // Not acknowledged: the visibility timeout redelivers.
                let reason = format!("{e:#}");
                warn!(
                    component = "extraction",
                    thread_id = %job.thread_id,
                    read_ct = msg.read_ct,
                    error = %reason,
                    "extraction failed; will retry"
                );
                if let Err(e) =
                    ibx_db::tracking_mark_retrying(&self.pool, job.thread_id, &reason).await
                {
                    warn!(component = "extraction", error = %format!("{e:#}"), "tracking write failed");
                }
            }
        }
    }

    async fn extract(&self, job: &ExtractionJob) -> Result<()> {
        let version = self.settings.extraction_version;

        // Redelivered job after a crash between insert and ack: record is
        // already there, just finish the bookkeeping.
        if ibx_db::has_extraction(&self.pool, job.thread_id, version).await? {
            ibx_db::mark_thread_messages_extracted(&self.pool, job.thread_id).await?;
            return Ok(());
        }

        let messages = ibx_db::fetch_thread_messages(&self.pool, job.thread_id).await?;
        if messages.is_empty() {
            // Nothing to extract; close the job rather than spinning on it.
            warn!(component = "extraction", thread_id = %job.thread_id, "thread has no messages; skipped");
            return Ok(());
        }

        let transcript = compose_transcript(&messages);
        let options = GenerateOptions {
            temperature: self.settings.llm_temperature,
            strict_schema: true,
        };
        let generated = self
            .llm
            .generate_object(
                &self.settings.llm_model,
                &ibx_llm::extraction_schema(),
                &extraction_prompt(&transcript),
                &options,
            )
            .await
            .map_err(|e| anyhow!("llm extraction failed: {e}"))?;

        let extraction = ThreadExtraction::from_generated(&generated.object)
            .map_err(|e| anyhow!("{e}"))?;

        let record = NewExtraction {
            thread_id: job.thread_id,
            extraction_version: version,
            summary: extraction.summary,
            intent: extraction.intent,
            urgency: extraction.urgency,
            sentiment: extraction.sentiment,
            needs_reply: extraction.needs_reply,
            actionability: extraction.actionability,
            scores: serde_json::to_value(&extraction.scores)?,
            tags: serde_json::to_value(&extraction.tags)?,
            tasks: serde_json::to_value(&extraction.tasks)?,
            risks: serde_json::to_value(&extraction.risks)?,
            keywords: serde_json::to_value(&extraction.keywords)?,
            participants: serde_json::to_value(&extraction.participants)?,
            project: extraction.project,
            message_type: extraction.message_type,
            is_reply: extraction.is_reply,
            is_forward: extraction.is_forward,
            reading_time_seconds: extraction.reading_time_seconds,
            model: self.settings.llm_model.clone(),
            usage: serde_json::json!({
                "prompt_tokens": generated.usage.prompt_tokens,
                "completion_tokens": generated.usage.completion_tokens,
            }),
        };

        if let Some(extraction_id) = ibx_db::insert_extraction(&self.pool, &record).await? {
            let entities: Vec<(String, String)> = extraction
                .entities
                .iter()
                .map(|e| (e.kind.clone(), e.value.clone()))
                .collect();
            if !entities.is_empty() {
                ibx_db::insert_extraction_entities(&self.pool, extraction_id, &entities).await?;
            }
        }

        ibx_db::mark_thread_messages_extracted(&self.pool, job.thread_id).await?;
        Ok(())
    }

    async fn ack(&self, msg_id: i64) {
        if let Err(e) = queue::delete_message(&self.pool, QUEUE_EXTRACTION, msg_id).await {
            warn!(component = "extraction", msg_id, error = %format!("{e:#}"), "queue delete failed");
        }
    }
}
