//! Extension trait and manager.
//!
//! Each extension is a long-lived subscriber to the event bus. The manager
//! gives every started extension its own subscription task, so one slow
//! extension never delays another, and handler errors are logged without
//! ending the subscription.

use crate::error::{ExtensionError, Result};
use async_trait::async_trait;
use homemesh_core::{MeshEvent, SharedEventBus};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How long `stop_all` waits for a subscription to finish handling `Stop`.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A supervised event-bus subscriber.
#[async_trait]
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Events this extension wants delivered.
    fn accepts(&self, _event: &MeshEvent) -> bool {
        true
    }

    async fn handle_event(&self, event: &MeshEvent) -> Result<()>;
}

struct Running {
    extension: Arc<dyn Extension>,
    task: JoinHandle<()>,
}

/// Starts, feeds and stops extensions.
pub struct ExtensionManager {
    event_bus: SharedEventBus,
    extensions: Mutex<Vec<Arc<dyn Extension>>>,
    running: Mutex<Vec<Running>>,
    drain_timeout: Duration,
}

impl ExtensionManager {
    pub fn new(event_bus: SharedEventBus) -> Self {
        Self {
            event_bus,
            extensions: Mutex::new(Vec::new()),
            running: Mutex::new(Vec::new()),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Add an extension. Names must be unique.
    pub fn register(&self, extension: Arc<dyn Extension>) -> Result<()> {
        let mut extensions = self.extensions.lock();
        if extensions.iter().any(|e| e.name() == extension.name()) {
            return Err(ExtensionError::AlreadyRegistered(extension.name().to_string()));
        }
        tracing::info!("Registered extension '{}'", extension.name());
        extensions.push(extension);
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.extensions
            .lock()
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }

    pub fn is_running(&self) -> bool {
        !self.running.lock().is_empty()
    }

    /// Start every extension in registration order.
    ///
    /// An extension whose `start` fails is logged and left out.
    pub async fn start_all(&self) -> Result<()> {
        if self.is_running() {
            return Err(ExtensionError::AlreadyRunning);
        }

        let extensions = self.extensions.lock().clone();
        for extension in extensions {
            if let Err(e) = extension.start().await {
                tracing::error!("Failed to start extension '{}': {}", extension.name(), e);
                continue;
            }

            let task = self.spawn_subscription(Arc::clone(&extension));
            self.running.lock().push(Running { extension, task });
        }
        Ok(())
    }

    /// The subscription always sees `Stop`, hands it on if the extension
    /// accepts it, and ends there.
    fn spawn_subscription(&self, extension: Arc<dyn Extension>) -> JoinHandle<()> {
        let filter_extension = Arc::clone(&extension);
        let mut rx = self.event_bus.subscribe_filtered(move |event| {
            matches!(event, MeshEvent::Stop) || filter_extension.accepts(event)
        });

        tokio::spawn(async move {
            while let Some((event, _)) = rx.recv().await {
                let stopping = matches!(event, MeshEvent::Stop);
                if !stopping || extension.accepts(&event) {
                    if let Err(e) = extension.handle_event(&event).await {
                        tracing::warn!(
                            "Extension '{}' failed to handle '{}': {}",
                            extension.name(),
                            event.type_name(),
                            e
                        );
                    }
                }
                if stopping {
                    break;
                }
            }
            tracing::debug!("Extension '{}' subscription ended", extension.name());
        })
    }

    /// Stop running extensions in reverse start order.
    ///
    /// Expects `Stop` to have been published: each subscription gets up to
    /// the drain timeout to handle it before it is aborted.
    pub async fn stop_all(&self) {
        self.shutdown(Some(self.drain_timeout)).await;
    }

    /// Stop running extensions without waiting for their subscriptions.
    pub async fn abort_all(&self) {
        self.shutdown(None).await;
    }

    async fn shutdown(&self, drain: Option<Duration>) {
        let running: Vec<Running> = std::mem::take(&mut *self.running.lock());
        for Running { extension, mut task } in running.into_iter().rev() {
            if let Some(drain) = drain {
                if tokio::time::timeout(drain, &mut task).await.is_err() {
                    tracing::warn!(
                        "Extension '{}' did not finish handling 'stop' in time",
                        extension.name()
                    );
                }
            }
            task.abort();
            if let Err(e) = extension.stop().await {
                tracing::warn!("Failed to stop extension '{}': {}", extension.name(), e);
            }
            tracing::debug!("Stopped extension '{}'", extension.name());
        }
    }
}
