use std::sync::Arc;
use tokio::sync::watch;

/// Cooperative stop signal shared between the signal handler and the
/// background tasks.
///
/// Shutdown is signalled through a `watch` channel that only ever changes
/// from `false` to `true`. The poll loop checks it between cycles, so a cycle
/// that has started always runs to completion, and awaits it while sleeping
/// so a stop request cuts the sleep short.
#[derive(Debug, Clone)]
pub struct ShutdownFlag {
    notify: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        let (notify, _) = watch::channel(false);
        Self {
            notify: Arc::new(notify),
        }
    }
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        // Succeeds with no receiver subscribed
        self.notify.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.notify.borrow()
    }

    /// Completes once the flag is triggered, immediately if it already is.
    pub async fn triggered(&self) {
        let mut receiver = self.notify.subscribe();
        loop {
            let stopped = *receiver.borrow_and_update();
            if stopped {
                return;
            }
            // The sender lives as long as `self`, so this only fails if the
            // channel is torn down underneath us.
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}
