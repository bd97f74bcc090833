//! AI enrichment stage: the extraction enqueuer and the extraction worker.
//!
//! The enqueuer discovers synced-but-unextracted threads, optionally runs the
//! spam gate, and publishes `extraction_jobs`; the worker composes a
//! transcript, calls the LLM with the fixed extraction schema, and persists a
//! versioned record.

pub mod enqueuer;
pub mod transcript;
pub mod worker;

pub use enqueuer::ExtractionEnqueuer;
pub use worker::ExtractionWorker;
