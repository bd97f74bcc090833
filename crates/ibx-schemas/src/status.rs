//! Status vocabularies for configurations, work rows, and extraction tracking.
//!
//! Stored as lowercase text columns; `as_str`/`parse` are the only conversion
//! points so a typo cannot reach SQL.

use anyhow::{anyhow, Result};

/// Lifecycle of a sync configuration.
///
/// `idle → backfill → thread_sync → completed`, side-edge to `failed` (checkpoint
/// preserved), recovery edge `completed → thread_sync` when the monitor finds
/// pending work rows behind a completed configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStatus {
    Idle,
    Backfill,
    ThreadSync,
    Completed,
    Failed,
}

impl ConfigStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigStatus::Idle => "idle",
            ConfigStatus::Backfill => "backfill",
            ConfigStatus::ThreadSync => "thread_sync",
            ConfigStatus::Completed => "completed",
            ConfigStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(ConfigStatus::Idle),
            "backfill" => Ok(ConfigStatus::Backfill),
            "thread_sync" => Ok(ConfigStatus::ThreadSync),
            "completed" => Ok(ConfigStatus::Completed),
            "failed" => Ok(ConfigStatus::Failed),
            other => Err(anyhow!("invalid configuration status: {}", other)),
        }
    }

    /// True while a backfill or thread-sync pass is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, ConfigStatus::Backfill | ConfigStatus::ThreadSync)
    }
}

/// Lifecycle of a per-thread work row.
///
/// `queued → processing → (completed | failed)`. The reverse edge
/// `processing → queued` exists only via the orchestrator's re-queue reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Queued => "queued",
            WorkStatus::Processing => "processing",
            WorkStatus::Completed => "completed",
            WorkStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(WorkStatus::Queued),
            "processing" => Ok(WorkStatus::Processing),
            "completed" => Ok(WorkStatus::Completed),
            "failed" => Ok(WorkStatus::Failed),
            other => Err(anyhow!("invalid work row status: {}", other)),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkStatus::Completed | WorkStatus::Failed)
    }
}

/// Lifecycle of an extraction tracking row.
///
/// The durable queue is authoritative for work; these states are visibility
/// only. `Queued`, `Processing` and `Retrying` block re-enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionQueueStatus {
    Queued,
    Processing,
    Retrying,
    Completed,
    Failed,
}

impl ExtractionQueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionQueueStatus::Queued => "queued",
            ExtractionQueueStatus::Processing => "processing",
            ExtractionQueueStatus::Retrying => "retrying",
            ExtractionQueueStatus::Completed => "completed",
            ExtractionQueueStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(ExtractionQueueStatus::Queued),
            "processing" => Ok(ExtractionQueueStatus::Processing),
            "retrying" => Ok(ExtractionQueueStatus::Retrying),
            "completed" => Ok(ExtractionQueueStatus::Completed),
            "failed" => Ok(ExtractionQueueStatus::Failed),
            other => Err(anyhow!("invalid extraction queue status: {}", other)),
        }
    }

    /// True while the thread must not be enqueued again.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ExtractionQueueStatus::Queued
                | ExtractionQueueStatus::Processing
                | ExtractionQueueStatus::Retrying
        )
    }
}
