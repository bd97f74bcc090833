//! Typed worker settings extracted from the merged config JSON.
//!
//! Extraction is pointer-based with per-field defaults: a missing key never
//! fails, an explicitly wrong-typed key falls back to the default. Secrets
//! (database URL, API keys) never appear here; they come from env only.

use serde_json::Value;

/// All recognized non-secret options, one flat struct shared by every role.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    // poll intervals
    pub backfill_poll_ms: u64,
    pub thread_sync_poll_ms: u64,
    pub webhook_poll_ms: u64,
    pub monitor_interval_ms: u64,
    pub recovery_interval_ms: u64,
    pub enqueuer_interval_ms: u64,
    pub extraction_poll_ms: u64,

    // batch sizes
    pub thread_sync_batch: i32,
    pub webhook_batch: i32,
    pub enqueuer_batch: i64,
    pub sweep_batch: i64,
    /// In-flight publishes per sweep chunk.
    pub sweep_concurrency: usize,

    // visibility timeouts (seconds)
    pub backfill_visibility: i32,
    pub thread_sync_visibility: i32,
    pub webhook_visibility: i32,
    pub extraction_visibility: i32,

    // advisory inter-call delays
    pub thread_delay_ms: u64,
    pub message_delay_ms: u64,
    pub api_delay_ms: u64,

    // retry ceilings per role
    pub backfill_max_retries: i32,
    pub thread_sync_max_retries: i32,
    pub webhook_max_retries: i32,
    pub extraction_max_retries: i32,

    // toggles
    pub auto_recovery: bool,
    pub spam_detection: bool,
    /// Disables queue deletion in the webhook consumer so a message is
    /// redelivered after its visibility timeout (debugging aid).
    pub testing_mode: bool,

    // LLM
    pub llm_model: String,
    pub spam_model: String,
    pub llm_temperature: f64,
    pub extraction_version: i32,

    // provider paging
    pub page_size: i32,
    pub max_messages_per_thread: i32,

    // parallelism for the roles that permit it
    pub thread_sync_workers: usize,
    pub extraction_workers: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            backfill_poll_ms: 1_000,
            thread_sync_poll_ms: 1_000,
            webhook_poll_ms: 1_000,
            monitor_interval_ms: 5_000,
            recovery_interval_ms: 60_000,
            enqueuer_interval_ms: 15_000,
            extraction_poll_ms: 1_000,

            thread_sync_batch: 5,
            webhook_batch: 10,
            enqueuer_batch: 10,
            sweep_batch: 100,
            sweep_concurrency: 8,

            backfill_visibility: 600,
            thread_sync_visibility: 300,
            webhook_visibility: 60,
            extraction_visibility: 300,

            thread_delay_ms: 0,
            message_delay_ms: 0,
            api_delay_ms: 0,

            backfill_max_retries: 3,
            thread_sync_max_retries: 5,
            webhook_max_retries: 3,
            extraction_max_retries: 3,

            auto_recovery: true,
            spam_detection: true,
            testing_mode: false,

            llm_model: "gpt-4o-mini".to_string(),
            spam_model: "gpt-4o-mini".to_string(),
            llm_temperature: 0.2,
            extraction_version: 1,

            page_size: 100,
            max_messages_per_thread: 100,

            thread_sync_workers: 2,
            extraction_workers: 2,
        }
    }
}

fn cfg_bool(v: &Value, ptr: &str, default: bool) -> bool {
    v.pointer(ptr).and_then(|x| x.as_bool()).unwrap_or(default)
}

fn cfg_u64(v: &Value, ptr: &str, default: u64) -> u64 {
    v.pointer(ptr).and_then(|x| x.as_u64()).unwrap_or(default)
}

fn cfg_i32(v: &Value, ptr: &str, default: i32) -> i32 {
    v.pointer(ptr)
        .and_then(|x| x.as_i64())
        .map(|x| x as i32)
        .unwrap_or(default)
}

fn cfg_i64(v: &Value, ptr: &str, default: i64) -> i64 {
    v.pointer(ptr).and_then(|x| x.as_i64()).unwrap_or(default)
}

fn cfg_f64(v: &Value, ptr: &str, default: f64) -> f64 {
    v.pointer(ptr).and_then(|x| x.as_f64()).unwrap_or(default)
}

fn cfg_str(v: &Value, ptr: &str, default: &str) -> String {
    v.pointer(ptr)
        .and_then(|x| x.as_str())
        .unwrap_or(default)
        .to_string()
}

impl SyncSettings {
    pub fn from_value(v: &Value) -> Self {
        let d = Self::default();
        Self {
            backfill_poll_ms: cfg_u64(v, "/sync/backfill_poll_ms", d.backfill_poll_ms),
            thread_sync_poll_ms: cfg_u64(v, "/sync/thread_sync_poll_ms", d.thread_sync_poll_ms),
            webhook_poll_ms: cfg_u64(v, "/sync/webhook_poll_ms", d.webhook_poll_ms),
            monitor_interval_ms: cfg_u64(v, "/sync/monitor_interval_ms", d.monitor_interval_ms),
            recovery_interval_ms: cfg_u64(v, "/sync/recovery_interval_ms", d.recovery_interval_ms),
            enqueuer_interval_ms: cfg_u64(v, "/extraction/enqueuer_interval_ms", d.enqueuer_interval_ms),
            extraction_poll_ms: cfg_u64(v, "/extraction/poll_ms", d.extraction_poll_ms),

            thread_sync_batch: cfg_i32(v, "/sync/thread_sync_batch", d.thread_sync_batch),
            webhook_batch: cfg_i32(v, "/sync/webhook_batch", d.webhook_batch),
            enqueuer_batch: cfg_i64(v, "/extraction/enqueuer_batch", d.enqueuer_batch),
            sweep_batch: cfg_i64(v, "/sync/sweep_batch", d.sweep_batch),
            sweep_concurrency: cfg_u64(v, "/sync/sweep_concurrency", d.sweep_concurrency as u64)
                as usize,

            backfill_visibility: cfg_i32(v, "/queues/backfill_visibility", d.backfill_visibility),
            thread_sync_visibility: cfg_i32(v, "/queues/thread_sync_visibility", d.thread_sync_visibility),
            webhook_visibility: cfg_i32(v, "/queues/webhook_visibility", d.webhook_visibility),
            extraction_visibility: cfg_i32(v, "/queues/extraction_visibility", d.extraction_visibility),

            thread_delay_ms: cfg_u64(v, "/sync/thread_delay_ms", d.thread_delay_ms),
            message_delay_ms: cfg_u64(v, "/sync/message_delay_ms", d.message_delay_ms),
            api_delay_ms: cfg_u64(v, "/sync/api_delay_ms", d.api_delay_ms),

            backfill_max_retries: cfg_i32(v, "/sync/backfill_max_retries", d.backfill_max_retries),
            thread_sync_max_retries: cfg_i32(v, "/sync/thread_sync_max_retries", d.thread_sync_max_retries),
            webhook_max_retries: cfg_i32(v, "/sync/webhook_max_retries", d.webhook_max_retries),
            extraction_max_retries: cfg_i32(v, "/extraction/max_retries", d.extraction_max_retries),

            auto_recovery: cfg_bool(v, "/sync/auto_recovery", d.auto_recovery),
            spam_detection: cfg_bool(v, "/extraction/spam_detection", d.spam_detection),
            testing_mode: cfg_bool(v, "/sync/testing_mode", d.testing_mode),

            llm_model: cfg_str(v, "/extraction/llm_model", &d.llm_model),
            spam_model: cfg_str(v, "/extraction/spam_model", &d.spam_model),
            llm_temperature: cfg_f64(v, "/extraction/llm_temperature", d.llm_temperature),
            extraction_version: cfg_i32(v, "/extraction/version", d.extraction_version),

            page_size: cfg_i32(v, "/sync/page_size", d.page_size),
            max_messages_per_thread: cfg_i32(v, "/sync/max_messages_per_thread", d.max_messages_per_thread),

            thread_sync_workers: cfg_u64(v, "/sync/thread_sync_workers", d.thread_sync_workers as u64)
                as usize,
            extraction_workers: cfg_u64(v, "/extraction/workers", d.extraction_workers as u64)
                as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let s = SyncSettings::from_value(&json!({}));
        assert_eq!(s, SyncSettings::default());
    }

    #[test]
    fn nested_overrides_apply() {
        let s = SyncSettings::from_value(&json!({
            "sync": { "page_size": 25, "testing_mode": true, "api_delay_ms": 150 },
            "extraction": { "spam_detection": false, "version": 3 },
            "queues": { "webhook_visibility": 120 },
        }));
        assert_eq!(s.page_size, 25);
        assert!(s.testing_mode);
        assert_eq!(s.api_delay_ms, 150);
        assert!(!s.spam_detection);
        assert_eq!(s.extraction_version, 3);
        assert_eq!(s.webhook_visibility, 120);
        // untouched keys keep defaults
        assert_eq!(s.thread_sync_batch, 5);
    }

    #[test]
    fn wrong_typed_key_falls_back() {
        let s = SyncSettings::from_value(&json!({ "sync": { "page_size": "lots" } }));
        assert_eq!(s.page_size, 100);
    }
}
