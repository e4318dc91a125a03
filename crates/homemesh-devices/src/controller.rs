//! Mesh controller.
//!
//! Owns the stack lifecycle and translates raw stack events into
//! `MeshEvent`s on the event bus.

use crate::mesh::{MeshStack, StackEvent};
use crate::resolver::EntityResolver;
use futures::StreamExt;
use homemesh_core::{BridgeConfig, Error, InterviewStatus, MeshEvent, Result, SharedEventBus};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;

const EVENT_SOURCE: &str = "controller";

/// Translates stack events into bus events.
#[derive(Clone)]
struct EventForwarder {
    stack: Arc<dyn MeshStack>,
    resolver: Arc<EntityResolver>,
    event_bus: SharedEventBus,
}

impl EventForwarder {
    async fn publish(&self, event: MeshEvent) {
        self.event_bus.publish_with_source(event, EVENT_SOURCE).await;
    }

    async fn forward(&self, event: StackEvent) {
        match event {
            StackEvent::Message(message) => {
                self.publish(MeshEvent::Message { message }).await;
            }
            StackEvent::DeviceJoined { address } => {
                // The device becomes usable once its interview succeeds
                tracing::info!("Device '{}' joined the network", address);
            }
            StackEvent::DeviceInterview { address, status } => {
                self.on_interview(address, status).await;
            }
            StackEvent::DeviceAnnounce { address } => {
                tracing::debug!("Device '{}' announced itself", address);
                self.publish(MeshEvent::DeviceAnnounce { address }).await;
            }
            StackEvent::DeviceLeave { address } => {
                tracing::warn!("Device '{}' left the network", address);
                self.resolver.invalidate(&address);
                self.publish(MeshEvent::DeviceLeave { address }).await;
            }
            StackEvent::AdapterDisconnected => {
                tracing::error!("Adapter disconnected");
                self.publish(MeshEvent::AdapterDisconnected).await;
            }
        }
    }

    async fn on_interview(&self, address: String, status: InterviewStatus) {
        let name = self
            .stack
            .device(&address)
            .map(|d| d.name().to_string())
            .unwrap_or_else(|| address.clone());

        match status {
            InterviewStatus::Successful => {
                tracing::info!("Successfully interviewed '{}', device has joined", name);
                self.resolver.invalidate(&address);
                if self.resolver.resolve(&address).is_some() {
                    self.publish(MeshEvent::DeviceJoined {
                        address: address.clone(),
                    })
                    .await;
                } else {
                    tracing::warn!("Device '{}' is NOT supported", name);
                }
            }
            InterviewStatus::Failed => {
                tracing::error!("Failed to interview '{}', device has not successfully been paired", name);
            }
            InterviewStatus::Started => {
                tracing::info!("Starting interview of '{}'", name);
            }
        }

        self.publish(MeshEvent::DeviceInterview { address, status })
            .await;
    }
}

/// Drives the mesh stack and feeds the event bus.
pub struct MeshController {
    forwarder: EventForwarder,
    config: BridgeConfig,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MeshController {
    pub fn new(
        stack: Arc<dyn MeshStack>,
        resolver: Arc<EntityResolver>,
        event_bus: SharedEventBus,
        config: BridgeConfig,
    ) -> Self {
        Self {
            forwarder: EventForwarder {
                stack,
                resolver,
                event_bus,
            },
            config,
            task: Mutex::new(None),
        }
    }

    pub fn stack(&self) -> &Arc<dyn MeshStack> {
        &self.forwarder.stack
    }

    pub fn resolver(&self) -> &Arc<EntityResolver> {
        &self.forwarder.resolver
    }

    pub fn event_bus(&self) -> &SharedEventBus {
        &self.forwarder.event_bus
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Start the stack and begin forwarding its events.
    ///
    /// Start is retried with backoff. `Started` is published once the stack
    /// is up and joining has been configured.
    pub async fn start(&self) -> Result<()> {
        self.spawn_forwarder();

        if let Err(e) = self.start_stack().await {
            self.abort_forwarder();
            return Err(e);
        }

        let permit = self.config.permit_join;
        if let Err(e) = self.stack().permit_join(permit).await {
            tracing::warn!("Failed to set permit join to {}: {}", permit, e);
        }

        tracing::info!("Mesh stack started");
        self.forwarder.publish(MeshEvent::Started).await;
        Ok(())
    }

    async fn start_stack(&self) -> Result<()> {
        let policy = &self.config.start_retry;
        let mut attempt = 1;
        loop {
            match self.stack().start().await {
                Ok(()) => return Ok(()),
                Err(e) if policy.should_retry(attempt) => {
                    let delay = policy.delay_for_attempt(attempt);
                    tracing::warn!(
                        "Failed to start mesh stack (attempt {}/{}): {}, retrying in {:?}",
                        attempt,
                        policy.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!("Failed to start mesh stack after {} attempts: {}", attempt, e);
                    return Err(Error::mesh(format!(
                        "stack failed to start after {} attempts: {}",
                        attempt, e
                    )));
                }
            }
        }
    }

    /// Publish `Stop`, stop forwarding and shut the stack down.
    pub async fn stop(&self) -> Result<()> {
        self.announce_stop().await;
        self.stop_stack().await
    }

    /// Publish `Stop` and stop forwarding. The stack stays up so `Stop`
    /// handlers can still reach devices.
    pub async fn announce_stop(&self) {
        self.forwarder.publish(MeshEvent::Stop).await;
        self.abort_forwarder();
    }

    pub async fn stop_stack(&self) -> Result<()> {
        self.stack().stop().await?;
        tracing::info!("Mesh stack stopped");
        Ok(())
    }

    /// Whether the forwarding task is alive.
    pub fn is_forwarding(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Translate one raw stack event.
    pub async fn handle_stack_event(&self, event: StackEvent) {
        self.forwarder.forward(event).await;
    }

    fn spawn_forwarder(&self) {
        let forwarder = self.forwarder.clone();
        let mut events = forwarder.stack.subscribe();
        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                forwarder.forward(event).await;
            }
            tracing::debug!("Stack event stream ended");
        });

        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
    }

    fn abort_forwarder(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for MeshController {
    fn drop(&mut self) {
        self.abort_forwarder();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::CapabilityDescriptor;
    use crate::mock::{MockCall, MockMeshStack};
    use crate::model::{Device, DeviceRole, Endpoint};
    use crate::registry::StaticDescriptorRegistry;
    use homemesh_core::EventBus;

    fn controller(stack: Arc<MockMeshStack>) -> (MeshController, SharedEventBus) {
        let registry = StaticDescriptorRegistry::new()
            .with_descriptor(CapabilityDescriptor::builder("E11-G13", "Sengled").build().unwrap());
        let resolver = Arc::new(EntityResolver::new(stack.clone(), Arc::new(registry)));
        let bus = Arc::new(EventBus::new());
        let config = BridgeConfig::default().with_permit_join(true);
        (MeshController::new(stack, resolver, bus.clone(), config), bus)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_retries_then_publishes() {
        let stack = Arc::new(MockMeshStack::new());
        stack.fail_start(2);
        let (controller, bus) = controller(stack.clone());
        let mut rx = bus.subscribe();

        let started = tokio::time::Instant::now();
        controller.start().await.unwrap();

        // 1s + 2s of backoff
        assert_eq!(started.elapsed().as_secs(), 3);
        assert!(stack.calls().contains(&MockCall::PermitJoin(true)));
        let (event, metadata) = rx.recv().await.unwrap();
        assert_eq!(event, MeshEvent::Started);
        assert_eq!(metadata.source, "controller");
        assert!(controller.is_forwarding());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_gives_up() {
        let stack = Arc::new(MockMeshStack::new());
        stack.fail_start(100);
        let (controller, _bus) = controller(stack);

        let err = controller.start().await.unwrap_err();
        assert!(matches!(err, Error::Mesh(_)));
        assert!(!controller.is_forwarding());
    }

    #[tokio::test]
    async fn test_interview_of_unsupported_device() {
        let stack = Arc::new(MockMeshStack::new().with_device(
            Device::new("0x09", DeviceRole::EndDevice)
                .with_model("unknown")
                .with_endpoint(Endpoint::new(1)),
        ));
        let (controller, bus) = controller(stack);
        let mut rx = bus.subscribe();

        controller
            .handle_stack_event(StackEvent::DeviceInterview {
                address: "0x09".into(),
                status: InterviewStatus::Successful,
            })
            .await;

        // No DeviceJoined, only the interview event
        let (event, _) = rx.recv().await.unwrap();
        assert!(matches!(event, MeshEvent::DeviceInterview { .. }));
        assert!(rx.try_recv().is_none());
    }
}
