//! Cooperative shutdown token over a tokio watch channel.

use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

/// Read side of the shutdown flag. Cheap to clone; one per role task.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Write side. Triggering is idempotent.
#[derive(Clone)]
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

pub fn shutdown_pair() -> (ShutdownController, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownController { tx }, Shutdown { rx })
}

impl ShutdownController {
    pub fn trigger(&self) {
        // send only fails when no receiver is left, at which point nothing
        // is running that could observe the flag anyway.
        let _ = self.tx.send(true);
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration` unless shutdown fires first.
    /// Returns true when interrupted by shutdown.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        // The flag only ever transitions false → true, so any change (or a
        // closed channel) means shutdown.
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.rx.changed() => true,
        }
    }

    /// Wait until shutdown fires.
    pub async fn triggered(&mut self) {
        while !self.is_triggered() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Wire ctrl-c to the controller. Spawned once per process.
pub fn spawn_signal_listener(controller: ShutdownController) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            controller.trigger();
        }
    });
}
