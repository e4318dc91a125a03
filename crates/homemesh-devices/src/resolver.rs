//! Entity resolution.
//!
//! Pairs a device with its capability descriptor. Lookups are cached per
//! address and the cache entry is dropped when the device re-interviews or
//! leaves.

use crate::descriptor::CapabilityDescriptor;
use crate::mesh::MeshStack;
use crate::model::{Device, Endpoint};
use crate::registry::DescriptorRegistry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A device paired with the descriptor for its model.
#[derive(Debug, Clone)]
pub struct ResolvedEntity {
    pub device: Device,
    pub descriptor: Arc<CapabilityDescriptor>,
}

impl ResolvedEntity {
    pub fn new(device: Device, descriptor: Arc<CapabilityDescriptor>) -> Self {
        Self { device, descriptor }
    }

    pub fn address(&self) -> &str {
        &self.device.address
    }

    /// Display name, e.g. `IKEA LED1545G12`.
    pub fn name(&self) -> String {
        format!("{} {}", self.descriptor.vendor(), self.descriptor.model())
    }

    /// Resolve an endpoint.
    ///
    /// `None` or `"default"` gives the descriptor's `default` endpoint, or the
    /// device's first endpoint. A number selects that endpoint ID. Any other
    /// name goes through the descriptor's endpoint map.
    pub fn endpoint(&self, key: Option<&str>) -> Option<&Endpoint> {
        match key {
            None | Some("default") => match self.descriptor.endpoints().get("default") {
                Some(id) => self.device.endpoint(*id),
                None => self.device.first_endpoint(),
            },
            Some(name) => match name.parse::<u8>() {
                Ok(id) => self.device.endpoint(id),
                Err(_) => self
                    .descriptor
                    .endpoints()
                    .get(name)
                    .and_then(|id| self.device.endpoint(*id)),
            },
        }
    }

    pub fn default_endpoint(&self) -> Option<&Endpoint> {
        self.endpoint(None)
    }

    /// Reverse lookup of a named endpoint. `default` never names an endpoint.
    pub fn endpoint_name(&self, id: u8) -> Option<&str> {
        self.descriptor
            .endpoints()
            .iter()
            .find(|(name, ep)| **ep == id && name.as_str() != "default")
            .map(|(name, _)| name.as_str())
    }
}

/// Resolves devices against a descriptor registry.
pub struct EntityResolver {
    stack: Arc<dyn MeshStack>,
    registry: Arc<dyn DescriptorRegistry>,
    /// `None` caches a known-unsupported model
    cache: RwLock<HashMap<String, Option<Arc<CapabilityDescriptor>>>>,
}

impl EntityResolver {
    pub fn new(stack: Arc<dyn MeshStack>, registry: Arc<dyn DescriptorRegistry>) -> Self {
        Self {
            stack,
            registry,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn stack(&self) -> &Arc<dyn MeshStack> {
        &self.stack
    }

    /// Resolve a device by address.
    pub fn resolve(&self, address: &str) -> Option<Arc<ResolvedEntity>> {
        match self.stack.device(address) {
            Some(device) => self.resolve_device(&device),
            None => {
                tracing::debug!("Failed to resolve entity '{}': unknown device", address);
                None
            }
        }
    }

    /// Resolve a device handle.
    ///
    /// Returns `None` for coordinators, devices still being interviewed and
    /// models without a descriptor.
    pub fn resolve_device(&self, device: &Device) -> Option<Arc<ResolvedEntity>> {
        if device.is_coordinator() {
            return None;
        }

        if device.interviewing {
            tracing::debug!(
                "Device '{}' is being interviewed, deferring resolution",
                device.address
            );
            return None;
        }

        let cached = self.cache.read().get(&device.address).cloned();
        let descriptor = match cached {
            Some(descriptor) => descriptor,
            None => {
                let descriptor = self.registry.find(device);
                if descriptor.is_none() {
                    tracing::warn!(
                        "Device '{}' with model '{}' is not supported",
                        device.address,
                        device.model_id.as_deref().unwrap_or("unknown")
                    );
                }
                self.cache
                    .write()
                    .insert(device.address.clone(), descriptor.clone());
                descriptor
            }
        }?;

        Some(Arc::new(ResolvedEntity::new(device.clone(), descriptor)))
    }

    /// Forget the cached descriptor for a device.
    pub fn invalidate(&self, address: &str) {
        if self.cache.write().remove(address).is_some() {
            tracing::debug!("Invalidated resolved entity for '{}'", address);
        }
    }

    pub fn clear(&self) {
        self.cache.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockMeshStack;
    use crate::model::DeviceRole;
    use crate::registry::StaticDescriptorRegistry;

    fn switch_descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor::builder("TS0003", "Tuya")
            .endpoint("left", 1)
            .endpoint("center", 2)
            .endpoint("right", 3)
            .build()
            .unwrap()
    }

    fn triple_switch(address: &str) -> Device {
        Device::new(address, DeviceRole::Router)
            .with_model("TS0003")
            .with_endpoint(Endpoint::new(1))
            .with_endpoint(Endpoint::new(2))
            .with_endpoint(Endpoint::new(3))
    }

    fn resolver(stack: MockMeshStack) -> EntityResolver {
        let registry = StaticDescriptorRegistry::new().with_descriptor(switch_descriptor());
        EntityResolver::new(Arc::new(stack), Arc::new(registry))
    }

    #[test]
    fn test_resolve_and_endpoints() {
        let resolver = resolver(MockMeshStack::new().with_device(triple_switch("0x01")));
        let entity = resolver.resolve("0x01").unwrap();

        assert_eq!(entity.name(), "Tuya TS0003");
        assert_eq!(entity.default_endpoint().unwrap().id, 1);
        assert_eq!(entity.endpoint(Some("right")).unwrap().id, 3);
        assert_eq!(entity.endpoint(Some("2")).unwrap().id, 2);
        assert!(entity.endpoint(Some("l4")).is_none());
        assert!(entity.endpoint(Some("9")).is_none());
        assert_eq!(entity.endpoint_name(2), Some("center"));
        assert_eq!(entity.endpoint_name(7), None);
    }

    #[test]
    fn test_interviewing_device_deferred() {
        let resolver = resolver(
            MockMeshStack::new().with_device(triple_switch("0x01").with_interviewing(true)),
        );
        assert!(resolver.resolve("0x01").is_none());
        // Nothing cached while interviewing
        assert!(resolver.cache.read().is_empty());
    }

    #[test]
    fn test_unsupported_and_unknown() {
        let stack = MockMeshStack::new()
            .with_device(Device::new("0x02", DeviceRole::Router).with_model("mystery"))
            .with_device(Device::coordinator("0x00"));
        let resolver = resolver(stack);

        assert!(resolver.resolve("0x02").is_none());
        assert!(resolver.resolve("0x00").is_none());
        assert!(resolver.resolve("0xff").is_none());
    }

    #[test]
    fn test_invalidate_re_resolves() {
        let stack = Arc::new(MockMeshStack::new().with_device(
            Device::new("0x03", DeviceRole::Router).with_model("TS0003"),
        ));
        let registry = Arc::new(StaticDescriptorRegistry::new());
        let resolver = EntityResolver::new(stack.clone(), registry.clone());

        assert!(resolver.resolve("0x03").is_none());

        registry.register(switch_descriptor());
        // Negative result is cached until invalidated
        assert!(resolver.resolve("0x03").is_none());
        resolver.invalidate("0x03");
        assert!(resolver.resolve("0x03").is_some());
    }
}
