//! Background maintenance: periodic expiry sweep over the episodic store.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::store::MemoryStore;

/// Handle to the running sweep task.
pub struct MaintenanceTask {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl MaintenanceTask {
    /// Spawn a sweep purging expired records every `interval`.
    pub fn spawn(store: Arc<dyn MemoryStore>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        match store.purge_expired().await {
                            Ok(0) => {}
                            Ok(purged) => {
                                tracing::debug!(purged, "memory maintenance sweep");
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "memory maintenance sweep failed");
                            }
                        }
                    }
                }
            }
        });
        Self { cancel, handle }
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}
