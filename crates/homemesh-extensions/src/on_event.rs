//! Hands mesh events to descriptor `on_event` hooks.

use crate::error::Result;
use crate::extension::Extension;
use async_trait::async_trait;
use homemesh_core::MeshEvent;
use homemesh_devices::{EntityResolver, ResolvedEntity};
use std::sync::Arc;

pub struct OnEventExtension {
    resolver: Arc<EntityResolver>,
}

impl OnEventExtension {
    pub fn new(resolver: Arc<EntityResolver>) -> Self {
        Self { resolver }
    }

    async fn call(&self, entity: &ResolvedEntity, event: &MeshEvent) {
        let Some(hook) = entity.descriptor.on_event_hook() else {
            return;
        };
        let stack = self.resolver.stack();
        if let Err(e) = hook.on_event(event, &entity.device, stack.as_ref()).await {
            tracing::warn!(
                "onEvent '{}' failed for '{}': {}",
                event.type_name(),
                entity.name(),
                e
            );
        }
    }
}

#[async_trait]
impl Extension for OnEventExtension {
    fn name(&self) -> &str {
        "on_event"
    }

    async fn handle_event(&self, event: &MeshEvent) -> Result<()> {
        match event {
            MeshEvent::Started | MeshEvent::Stop => {
                for device in self.resolver.stack().clients() {
                    if let Some(entity) = self.resolver.resolve_device(&device) {
                        self.call(&entity, event).await;
                    }
                }
            }
            _ => {
                let Some(address) = event.device_address() else {
                    return Ok(());
                };
                if let Some(entity) = self.resolver.resolve(address) {
                    self.call(&entity, event).await;
                }
            }
        }
        Ok(())
    }
}
