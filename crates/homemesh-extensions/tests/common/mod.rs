#![allow(dead_code)]

use async_trait::async_trait;
use homemesh_core::{MeshEvent, MeshMessage};
use homemesh_devices::generic::{OnOff, OnOffDecoder};
use homemesh_devices::{
    CapabilityDescriptor, ConfigureHook, Device, DeviceRole, Endpoint, EntityResolver, MeshStack,
    MockMeshStack, OtaHook, PowerSource, PropertySpec, StaticDescriptorRegistry,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

pub const PLUG: &str = "0x11";
pub const CONFIGURE_KEY: u32 = 7;

/// Configure hook that counts calls and fails on demand.
#[derive(Clone, Default)]
pub struct CountingConfigure {
    pub calls: Arc<AtomicUsize>,
    pub fail: Arc<AtomicBool>,
    pub delay_ms: Arc<AtomicU64>,
    pub active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
}

impl CountingConfigure {
    pub fn failing() -> Self {
        let hook = Self::default();
        hook.fail.store(true, Ordering::SeqCst);
        hook
    }

    /// Each call takes `delay` to complete.
    pub fn slow(delay: std::time::Duration) -> Self {
        let hook = Self::default();
        hook.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
        hook
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls ever in flight at once.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigureHook for CountingConfigure {
    async fn configure(
        &self,
        _stack: &dyn MeshStack,
        _device: &Device,
        _coordinator_endpoint: u8,
    ) -> homemesh_core::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return Err(homemesh_core::Error::mesh("bind failed"));
        }
        Ok(())
    }
}

/// OTA hook that counts upstream checks.
#[derive(Clone, Default)]
pub struct CountingOta {
    pub checks: Arc<AtomicUsize>,
}

impl CountingOta {
    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OtaHook for CountingOta {
    async fn is_update_available(
        &self,
        _device: &Device,
        _request: &Value,
    ) -> homemesh_core::Result<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }
}

pub fn plug_descriptor() -> homemesh_devices::DescriptorBuilder {
    CapabilityDescriptor::builder("E11-N1EA", "Sengled")
        .property(PropertySpec::binary("state", json!("ON"), json!("OFF")))
        .to_converter(OnOff::new())
        .from_converter(OnOffDecoder::new())
}

pub fn plug(address: &str) -> Device {
    Device::new(address, DeviceRole::Router)
        .with_model("E11-N1EA")
        .with_power_source(PowerSource::Mains)
        .with_endpoint(
            Endpoint::new(1)
                .with_input_clusters(["genOnOff"])
                .with_output_clusters(["genOta"]),
        )
}

pub struct Harness {
    pub stack: Arc<MockMeshStack>,
    pub resolver: Arc<EntityResolver>,
}

pub async fn harness(descriptors: Vec<CapabilityDescriptor>, devices: Vec<Device>) -> Harness {
    let stack = Arc::new(MockMeshStack::new().with_device(Device::coordinator("0x00")));
    for device in devices {
        stack.add_device(device);
    }
    stack.start().await.unwrap();

    let registry = StaticDescriptorRegistry::new();
    for descriptor in descriptors {
        registry.register(descriptor);
    }
    let resolver = Arc::new(EntityResolver::new(stack.clone(), Arc::new(registry)));
    Harness { stack, resolver }
}

pub fn message(address: &str, cluster: &str, message_type: &str, data: Value) -> MeshEvent {
    MeshEvent::Message {
        message: MeshMessage::new(address, 1, cluster, message_type, data),
    }
}

pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
}
