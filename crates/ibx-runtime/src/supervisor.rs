//! Supervisor: spawns role tasks and joins them on shutdown.

use std::future::Future;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::shutdown::{shutdown_pair, Shutdown, ShutdownController};

/// Owns the shutdown pair and every spawned role task.
///
/// A role that returns an error triggers shutdown of all other roles
/// (uncaught top-level failure ends the whole process gracefully); a role
/// that returns Ok simply ends, which is normal during shutdown.
pub struct Supervisor {
    controller: ShutdownController,
    shutdown: Shutdown,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        let (controller, shutdown) = shutdown_pair();
        Self {
            controller,
            shutdown,
            handles: Vec::new(),
        }
    }

    pub fn controller(&self) -> ShutdownController {
        self.controller.clone()
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Spawn one role. `make` receives the role's shutdown token.
    pub fn spawn<F, Fut>(&mut self, name: &str, make: F)
    where
        F: FnOnce(Shutdown) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let role = name.to_string();
        let controller = self.controller.clone();
        let fut = make(self.shutdown.clone());

        let handle = tokio::spawn(async move {
            info!(component = %role, "role started");
            match fut.await {
                Ok(()) => info!(component = %role, "role stopped"),
                Err(e) => {
                    error!(component = %role, error = %format!("{e:#}"), "role failed; shutting down");
                    controller.trigger();
                }
            }
        });

        self.handles.push((name.to_string(), handle));
    }

    /// Wait for every role to finish. Call after shutdown has been triggered
    /// (or let the signal listener trigger it).
    pub async fn join_all(self) {
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                error!(component = %name, error = %e, "role task panicked");
            }
        }
        info!("all roles joined");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn roles_observe_shutdown_and_join() {
        let mut sup = Supervisor::new();
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        sup.spawn("probe", move |mut sd| async move {
            sd.triggered().await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        sup.controller().trigger();
        sup.join_all().await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failing_role_triggers_shutdown_of_peers() {
        let mut sup = Supervisor::new();

        sup.spawn("waiter", move |mut sd| async move {
            sd.triggered().await;
            Ok(())
        });
        sup.spawn("crasher", move |_sd| async move {
            Err(anyhow::anyhow!("boom"))
        });

        // join_all returns only because the crasher's error triggered the
        // waiter's shutdown.
        sup.join_all().await;
    }
}
