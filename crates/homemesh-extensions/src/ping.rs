//! Liveness pings for devices that go unreachable without telling anyone.

use crate::error::Result;
use crate::extension::Extension;
use async_trait::async_trait;
use homemesh_core::MeshEvent;
use homemesh_devices::{Device, DeviceRole, EntityResolver, MeshStack, PowerSource};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// End devices that must be pinged like routers.
pub const PINGABLE_MODELS: &[&str] = &["E11-G13", "E11-N1EA", "53170161"];

pub fn is_pingable(device: &Device) -> bool {
    if device
        .model_id
        .as_deref()
        .is_some_and(|model| PINGABLE_MODELS.contains(&model))
    {
        return true;
    }
    device.role == DeviceRole::Router && device.power_source != PowerSource::Battery
}

#[derive(Default)]
struct PingRecord {
    /// Bumped on every reschedule; a timer only acts for its own generation
    generation: u64,
    timer: Option<JoinHandle<()>>,
    failures: u32,
}

struct PingInner {
    resolver: Arc<EntityResolver>,
    stack: Arc<dyn MeshStack>,
    interval: Duration,
    records: Mutex<HashMap<String, PingRecord>>,
}

/// Pings mains-powered routers and a few known end devices once per interval.
///
/// Any traffic from a device restarts its timer. Failures are logged and the
/// timer is always rearmed.
#[derive(Clone)]
pub struct PingExtension {
    inner: Arc<PingInner>,
}

impl PingExtension {
    pub fn new(resolver: Arc<EntityResolver>, interval: Duration) -> Self {
        Self {
            inner: Arc::new(PingInner {
                stack: Arc::clone(resolver.stack()),
                resolver,
                interval,
                records: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn is_scheduled(&self, address: &str) -> bool {
        self.inner
            .records
            .lock()
            .get(address)
            .is_some_and(|r| r.timer.is_some())
    }

    /// Consecutive failed pings.
    pub fn failures(&self, address: &str) -> u32 {
        self.inner
            .records
            .lock()
            .get(address)
            .map(|r| r.failures)
            .unwrap_or(0)
    }

    fn cancel_all(&self) {
        let mut records = self.inner.records.lock();
        for record in records.values_mut() {
            if let Some(timer) = record.timer.take() {
                timer.abort();
            }
        }
    }
}

impl PingInner {
    fn schedule(self: &Arc<Self>, address: &str) {
        let mut records = self.records.lock();
        let record = records.entry(address.to_string()).or_default();
        record.generation += 1;
        if let Some(timer) = record.timer.take() {
            timer.abort();
        }

        let generation = record.generation;
        let inner = Arc::clone(self);
        let address = address.to_string();
        record.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.interval).await;
            inner.on_timer(&address, generation).await;
        }));
    }

    async fn on_timer(self: &Arc<Self>, address: &str, generation: u64) {
        {
            let mut records = self.records.lock();
            match records.get_mut(address) {
                Some(record) if record.generation == generation => record.timer = None,
                _ => return,
            }
        }

        let Some(entity) = self.resolver.resolve(address) else {
            tracing::debug!("Ping: Stop pinging '{}', device is not known anymore", address);
            self.records.lock().remove(address);
            return;
        };
        let name = entity.name();

        let outcome = self.stack.ping(address).await;

        {
            let mut records = self.records.lock();
            let Some(record) = records.get_mut(address) else {
                return;
            };
            match outcome {
                Ok(()) => {
                    record.failures = 0;
                    tracing::debug!("Ping: Successfully pinged '{}'", name);
                }
                Err(e) => {
                    record.failures += 1;
                    // Already unavailable devices only log at debug
                    if record.failures == 1 {
                        tracing::error!("Ping: Failed to ping '{}': {}", name, e);
                    } else {
                        tracing::debug!(
                            "Ping: Failed to ping '{}' ({} times): {}",
                            name,
                            record.failures,
                            e
                        );
                    }
                }
            }
            // Traffic during the ping already rearmed the timer
            if record.generation != generation {
                return;
            }
        }

        self.schedule(address);
    }
}

#[async_trait]
impl Extension for PingExtension {
    fn name(&self) -> &str {
        "ping"
    }

    async fn stop(&self) -> Result<()> {
        self.cancel_all();
        Ok(())
    }

    fn accepts(&self, event: &MeshEvent) -> bool {
        matches!(
            event,
            MeshEvent::Started | MeshEvent::Stop | MeshEvent::Message { .. }
        )
    }

    async fn handle_event(&self, event: &MeshEvent) -> Result<()> {
        match event {
            MeshEvent::Started => {
                for device in self.inner.stack.clients() {
                    if is_pingable(&device) {
                        self.inner.schedule(&device.address);
                    }
                }
            }
            MeshEvent::Stop => self.cancel_all(),
            MeshEvent::Message { message } => {
                if let Some(device) = self.inner.stack.device(&message.address) {
                    if is_pingable(&device) {
                        self.inner.schedule(&device.address);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_pingable() {
        let router = Device::new("0x01", DeviceRole::Router).with_power_source(PowerSource::Mains);
        assert!(is_pingable(&router));

        let battery_router =
            Device::new("0x02", DeviceRole::Router).with_power_source(PowerSource::Battery);
        assert!(!is_pingable(&battery_router));

        let sensor = Device::new("0x03", DeviceRole::EndDevice)
            .with_power_source(PowerSource::Battery)
            .with_model("TRADFRI remote control");
        assert!(!is_pingable(&sensor));

        let plug = Device::new("0x04", DeviceRole::EndDevice).with_model("E11-N1EA");
        assert!(is_pingable(&plug));
    }
}
