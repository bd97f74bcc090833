//! Extraction enqueuer.
//!
//! Periodically selects a bounded batch of threads that have messages but no
//! extraction record, runs the optional spam gate, and publishes
//! `extraction_jobs` with an idempotent tracking insert. Singleton per
//! installation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tracing::{info, warn};

use ibx_config::SyncSettings;
use ibx_db::{queue, CandidateThread};
use ibx_llm::{GenerateOptions, LlmClient, SpamVerdict};
use ibx_runtime::Shutdown;
use ibx_schemas::{ExtractionJob, QUEUE_EXTRACTION};

use crate::transcript::spam_prompt;

pub struct ExtractionEnqueuer {
    pool: PgPool,
    llm: Arc<dyn LlmClient>,
    settings: SyncSettings,
}

impl ExtractionEnqueuer {
    pub fn new(pool: PgPool, llm: Arc<dyn LlmClient>, settings: SyncSettings) -> Self {
        Self {
            pool,
            llm,
            settings,
        }
    }

    pub async fn run(self, mut shutdown: Shutdown) -> Result<()> {
        loop {
            if shutdown.is_triggered() {
                break;
            }
            match self.poll_once(&shutdown).await {
                Ok(0) => {}
                Ok(n) => info!(component = "extraction-enqueuer", enqueued = n, "batch enqueued"),
                Err(e) => {
                    warn!(component = "extraction-enqueuer", error = %format!("{e:#}"), "poll failed")
                }
            }
            if shutdown
                .sleep(Duration::from_millis(self.settings.enqueuer_interval_ms))
                .await
            {
                break;
            }
        }
        Ok(())
    }

    /// One discovery pass. Returns the number of jobs published.
    pub async fn poll_once(&self, shutdown: &Shutdown) -> Result<usize> {
        let candidates = ibx_db::list_extraction_candidates(
            &self.pool,
            self.settings.extraction_version,
            self.settings.enqueuer_batch,
        )
        .await?;

        let mut enqueued = 0usize;
        for candidate in candidates {
            if shutdown.is_triggered() {
                break;
            }
            match self.enqueue_candidate(&candidate).await {
                Ok(true) => enqueued += 1,
                Ok(false) => {}
                Err(e) => {
                    // Next pass retries this thread; one bad candidate never
                    // blocks the batch.
                    warn!(
                        component = "extraction-enqueuer",
                        thread_id = %candidate.thread_id,
                        error = %format!("{e:#}"),
                        "candidate skipped"
                    );
                }
            }
        }
        Ok(enqueued)
    }

    async fn enqueue_candidate(&self, candidate: &CandidateThread) -> Result<bool> {
        if self.settings.spam_detection {
            if let Some(verdict) = self.classify_spam(candidate).await? {
                if verdict.should_skip() {
                    ibx_db::mark_thread_spam(
                        &self.pool,
                        candidate.thread_id,
                        verdict.is_spam,
                        verdict.is_promotional,
                        verdict.confidence,
                        &verdict.reasoning,
                    )
                    .await?;
                    info!(
                        component = "extraction-enqueuer",
                        thread_id = %candidate.thread_id,
                        is_spam = verdict.is_spam,
                        is_promotional = verdict.is_promotional,
                        "thread gated as spam/promotional"
                    );
                    return Ok(false);
                }
            }
        }

        if ibx_db::tracking_active(&self.pool, candidate.thread_id).await? {
            return Ok(false);
        }

        // Publish first, tracking row second. A crash in between leaves a
        // queue message the worker simply processes; the reverse order would
        // leave an active tracking row that blocks rediscovery forever.
        let job = ExtractionJob {
            thread_id: candidate.thread_id,
            inbox_id: candidate.inbox_id,
            tenant_id: candidate.tenant_id,
            priority: 0,
        };
        queue::enqueue(&self.pool, QUEUE_EXTRACTION, &job).await?;

        // Duplicate tracking inserts are swallowed as successful skips.
        let _ = ibx_db::tracking_enqueue(
            &self.pool,
            candidate.thread_id,
            candidate.inbox_id,
            candidate.tenant_id,
            0,
        )
        .await?;
        Ok(true)
    }

    /// Spam gate over the first message of the thread. An LLM failure
    /// downgrades to "no verdict" so extraction still proceeds.
    async fn classify_spam(&self, candidate: &CandidateThread) -> Result<Option<SpamVerdict>> {
        let messages = ibx_db::fetch_thread_messages(&self.pool, candidate.thread_id).await?;
        let Some(first) = messages.first() else {
            return Ok(None);
        };

        let snippet = first
            .snippet
            .as_deref()
            .or(first.body.as_deref())
            .unwrap_or("");
        let subject = candidate.subject.as_deref().unwrap_or("(no subject)");
        let prompt = spam_prompt(subject, snippet);

        let options = GenerateOptions {
            temperature: self.settings.llm_temperature,
            strict_schema: true,
        };
        match self
            .llm
            .generate_object(
                &self.settings.spam_model,
                &ibx_llm::spam_schema(),
                &prompt,
                &options,
            )
            .await
        {
            Ok(generated) => Ok(Some(SpamVerdict::from_generated(&generated.object)?)),
            Err(e) => {
                warn!(
                    component = "extraction-enqueuer",
                    thread_id = %candidate.thread_id,
                    error = %e,
                    "spam gate unavailable; proceeding without verdict"
                );
                Ok(None)
            }
        }
    }
}
