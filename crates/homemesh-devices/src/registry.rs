//! Capability descriptor registry.

use crate::descriptor::CapabilityDescriptor;
use crate::model::Device;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Looks up the descriptor for a device's model.
pub trait DescriptorRegistry: Send + Sync {
    fn find(&self, device: &Device) -> Option<Arc<CapabilityDescriptor>>;
}

/// In-memory registry keyed by reported model identifier.
#[derive(Default)]
pub struct StaticDescriptorRegistry {
    by_model_id: RwLock<HashMap<String, Arc<CapabilityDescriptor>>>,
}

impl StaticDescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_descriptor(self, descriptor: CapabilityDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    /// Register a descriptor under each of its model identifiers.
    pub fn register(&self, descriptor: CapabilityDescriptor) -> Arc<CapabilityDescriptor> {
        let descriptor = Arc::new(descriptor);
        let mut map = self.by_model_id.write();
        for model_id in descriptor.model_ids() {
            if map
                .insert(model_id.clone(), Arc::clone(&descriptor))
                .is_some()
            {
                tracing::warn!(
                    "Descriptor for model id '{}' replaced by '{}'",
                    model_id,
                    descriptor.model()
                );
            }
        }
        descriptor
    }

    pub fn len(&self) -> usize {
        self.by_model_id.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DescriptorRegistry for StaticDescriptorRegistry {
    fn find(&self, device: &Device) -> Option<Arc<CapabilityDescriptor>> {
        let model_id = device.model_id.as_deref()?;
        self.by_model_id.read().get(model_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceRole;

    #[test]
    fn test_find_by_model_id() {
        let registry = StaticDescriptorRegistry::new().with_descriptor(
            CapabilityDescriptor::builder("E11-G13", "Sengled")
                .model_id("E11-G13")
                .model_id("E11-G23")
                .build()
                .unwrap(),
        );
        assert_eq!(registry.len(), 2);

        let device = Device::new("0x01", DeviceRole::Router).with_model("E11-G23");
        assert_eq!(registry.find(&device).unwrap().model(), "E11-G13");

        let unknown = Device::new("0x02", DeviceRole::Router).with_model("unknown");
        assert!(registry.find(&unknown).is_none());

        let no_model = Device::new("0x03", DeviceRole::Router);
        assert!(registry.find(&no_model).is_none());
    }
}
