//! Sync core: the backfill orchestrator, thread-sync worker, webhook
//! consumer, and completion monitor.
//!
//! Each role is a struct holding its explicit dependencies (pool, provider,
//! settings) with a `run(shutdown)` polling loop and a `poll_once` that tests
//! drive directly. Per-thread errors never cross threads; payload errors
//! never crash a role.

pub mod backfill;
pub mod ingest;
pub mod monitor;
pub mod thread_sync;
pub mod webhook;
pub mod window;

pub use backfill::{sweep_unpublished, BackfillOrchestrator};
pub use monitor::CompletionMonitor;
pub use thread_sync::ThreadSyncWorker;
pub use webhook::WebhookConsumer;
pub use window::clamp_backfill_window;
