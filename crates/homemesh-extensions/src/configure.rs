//! Device configuration (bindings, reporting) run once per descriptor version.

use crate::error::{ExtensionError, Result};
use crate::extension::Extension;
use async_trait::async_trait;
use homemesh_core::MeshEvent;
use homemesh_devices::{EntityResolver, MeshStack, ResolvedEntity};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-device scheduling state.
#[derive(Debug, Default, Clone, Copy)]
struct ConfigureRecord {
    attempts: u32,
    configuring: bool,
}

struct ConfigureInner {
    stack: Arc<dyn MeshStack>,
    resolver: Arc<EntityResolver>,
    max_attempts: u32,
    records: Mutex<HashMap<String, ConfigureRecord>>,
}

/// Runs descriptor configure hooks.
///
/// A device is configured at network start, after it joins, and on traffic
/// from devices that are always awake. Failed attempts are counted; once the
/// cap is reached the device is left alone until it joins again.
#[derive(Clone)]
pub struct ConfigureExtension {
    inner: Arc<ConfigureInner>,
}

impl ConfigureExtension {
    pub fn new(resolver: Arc<EntityResolver>, max_attempts: u32) -> Self {
        Self {
            inner: Arc::new(ConfigureInner {
                stack: Arc::clone(resolver.stack()),
                resolver,
                max_attempts,
                records: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Configure a device now. `force` ignores the attempt cap.
    ///
    /// Returns `Ok(false)` when nothing ran (no hook, or already configuring).
    pub async fn configure(&self, address: &str, force: bool) -> Result<bool> {
        let entity = self
            .inner
            .resolver
            .resolve(address)
            .ok_or_else(|| ExtensionError::DeviceNotFound(address.to_string()))?;
        self.inner.configure(&entity, force).await
    }

    /// Failed attempts since the last success or join.
    pub fn attempts(&self, address: &str) -> u32 {
        self.inner
            .records
            .lock()
            .get(address)
            .map(|r| r.attempts)
            .unwrap_or(0)
    }

    fn spawn_configure(&self, entity: Arc<ResolvedEntity>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            // Failures are logged inside
            let _ = inner.configure(&entity, false).await;
        });
    }
}

impl ConfigureInner {
    fn should_configure(&self, entity: &ResolvedEntity) -> bool {
        if entity.descriptor.configure_hook().is_none() {
            return false;
        }
        if self.stack.configured_marker(entity.address()) == Some(entity.descriptor.configure_key()) {
            return false;
        }
        !entity.device.interviewing
    }

    fn coordinator_endpoint(&self) -> u8 {
        self.stack
            .coordinator()
            .and_then(|c| c.endpoint(1).or_else(|| c.first_endpoint()).map(|e| e.id))
            .unwrap_or(1)
    }

    async fn configure(&self, entity: &ResolvedEntity, force: bool) -> Result<bool> {
        let Some(hook) = entity.descriptor.configure_hook() else {
            return Ok(false);
        };
        let address = entity.address().to_string();

        {
            let mut records = self.records.lock();
            let record = records.entry(address.clone()).or_default();
            if record.configuring || (record.attempts >= self.max_attempts && !force) {
                return Ok(false);
            }
            record.configuring = true;
        }

        let name = entity.name();
        tracing::info!("Configuring '{}'", name);
        let outcome = hook
            .configure(self.stack.as_ref(), &entity.device, self.coordinator_endpoint())
            .await;

        let mut records = self.records.lock();
        let record = records.entry(address.clone()).or_default();
        record.configuring = false;

        match outcome {
            Ok(()) => {
                record.attempts = 0;
                drop(records);
                self.stack
                    .set_configured_marker(&address, Some(entity.descriptor.configure_key()));
                tracing::info!("Successfully configured '{}'", name);
                Ok(true)
            }
            Err(e) => {
                record.attempts += 1;
                let attempt = record.attempts;
                drop(records);
                tracing::error!("Failed to configure '{}', attempt {} ({})", name, attempt, e);
                Err(ExtensionError::ConfigureFailed {
                    device: name,
                    attempt,
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl Extension for ConfigureExtension {
    fn name(&self) -> &str {
        "configure"
    }

    fn accepts(&self, event: &MeshEvent) -> bool {
        matches!(
            event,
            MeshEvent::Started | MeshEvent::DeviceJoined { .. } | MeshEvent::Message { .. }
        )
    }

    async fn handle_event(&self, event: &MeshEvent) -> Result<()> {
        match event {
            MeshEvent::Started => {
                for device in self.inner.stack.clients() {
                    let Some(entity) = self.inner.resolver.resolve_device(&device) else {
                        continue;
                    };
                    if self.inner.should_configure(&entity) {
                        self.spawn_configure(entity);
                    }
                }
            }
            MeshEvent::DeviceJoined { address } => {
                // A rejoin starts a new configuration epoch. An attempt
                // still in flight keeps its claim on the device.
                self.inner.stack.set_configured_marker(address, None);
                if let Some(record) = self.inner.records.lock().get_mut(address) {
                    record.attempts = 0;
                }

                if let Some(entity) = self.inner.resolver.resolve(address) {
                    if self.inner.should_configure(&entity) {
                        self.spawn_configure(entity);
                    }
                }
            }
            MeshEvent::Message { message } => {
                let Some(entity) = self.inner.resolver.resolve(&message.address) else {
                    return Ok(());
                };
                if entity.device.is_sleepy() {
                    return Ok(());
                }
                if self.inner.should_configure(&entity) {
                    self.spawn_configure(entity);
                }
            }
            _ => {}
        }
        Ok(())
    }
}
