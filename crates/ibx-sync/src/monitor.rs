//! Completion monitor.
//!
//! Every `monitor_interval_ms` the monitor recomputes stats for each active
//! configuration from the work-row table (server-side aggregate, never a
//! client-side row scan) and closes configurations whose tally satisfies the
//! completion predicate. At the coarser `recovery_interval_ms` it reverts
//! configurations that were marked completed while work rows were still
//! pending. Singleton per installation.

use std::time::{Duration, Instant};

use anyhow::Result;
use sqlx::PgPool;
use tracing::{info, warn};

use ibx_config::SyncSettings;
use ibx_runtime::Shutdown;

pub struct CompletionMonitor {
    pool: PgPool,
    settings: SyncSettings,
}

impl CompletionMonitor {
    pub fn new(pool: PgPool, settings: SyncSettings) -> Self {
        Self { pool, settings }
    }

    pub async fn run(self, mut shutdown: Shutdown) -> Result<()> {
        let recovery_interval = Duration::from_millis(self.settings.recovery_interval_ms);
        let mut last_recovery = Instant::now();

        loop {
            if shutdown.is_triggered() {
                break;
            }

            if let Err(e) = self.derive_and_close().await {
                warn!(component = "monitor", error = %format!("{e:#}"), "stats pass failed");
            }

            if self.settings.auto_recovery && last_recovery.elapsed() >= recovery_interval {
                last_recovery = Instant::now();
                if let Err(e) = self.recover_premature_completions().await {
                    warn!(component = "monitor", error = %format!("{e:#}"), "recovery pass failed");
                }
            }

            if shutdown
                .sleep(Duration::from_millis(self.settings.monitor_interval_ms))
                .await
            {
                break;
            }
        }
        Ok(())
    }

    /// One stats pass over every active configuration.
    pub async fn derive_and_close(&self) -> Result<usize> {
        let config_ids = ibx_db::list_active_config_ids(&self.pool).await?;
        let mut closed = 0usize;

        for config_id in config_ids {
            let tally = ibx_db::tally_work_rows(&self.pool, config_id).await?;
            ibx_db::write_derived_stats(&self.pool, config_id, &tally).await?;

            if tally.is_complete() && ibx_db::complete_configuration(&self.pool, config_id).await? {
                ibx_db::stamp_stats_completed(&self.pool, config_id).await?;
                closed += 1;
                info!(
                    component = "monitor",
                    config_id = %config_id,
                    completed = tally.completed,
                    failed = tally.failed,
                    messages_synced = tally.messages_synced,
                    "configuration completed"
                );
            }
        }

        Ok(closed)
    }

    /// One recovery pass: completed configurations that still have queued or
    /// processing work rows go back to `thread_sync`.
    pub async fn recover_premature_completions(&self) -> Result<usize> {
        let config_ids = ibx_db::list_premature_completions(&self.pool).await?;
        let mut reverted = 0usize;

        for config_id in config_ids {
            if ibx_db::revert_premature_completion(&self.pool, config_id).await? {
                reverted += 1;
                warn!(
                    component = "monitor",
                    config_id = %config_id,
                    "premature completion reverted to thread_sync"
                );
            }
        }

        Ok(reverted)
    }
}
