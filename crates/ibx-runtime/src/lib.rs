//! Role runtime: cooperative shutdown and the worker supervisor.
//!
//! Every worker role is a long-running polling loop. Roles observe the
//! shutdown token at the top of each iteration and at natural seams (between
//! pages, threads, messages); the supervisor joins all roles on shutdown so
//! in-flight iterations complete before the process exits.

pub mod shutdown;
pub mod supervisor;

pub use shutdown::{shutdown_pair, spawn_signal_listener, Shutdown, ShutdownController};
pub use supervisor::Supervisor;
