//! Accessory lifecycle and message routing.

use crate::error::Result;
use crate::extension::Extension;
use crate::host::AccessoryHost;
use async_trait::async_trait;
use homemesh_accessory::{AccessoryContext, MeshAccessory};
use homemesh_core::{MeshEvent, MeshMessage};
use homemesh_devices::{Device, EntityResolver, StateMap};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Keeps one `MeshAccessory` per supported device and routes inbound
/// messages to it.
///
/// The mesh network is the source of truth: cached host accessories for
/// devices that are no longer on the network are removed at start.
pub struct BridgeExtension {
    resolver: Arc<EntityResolver>,
    context: Arc<AccessoryContext>,
    host: Arc<dyn AccessoryHost>,
    accessories: RwLock<HashMap<String, MeshAccessory>>,
    routing: AtomicBool,
}

impl BridgeExtension {
    pub fn new(
        resolver: Arc<EntityResolver>,
        context: Arc<AccessoryContext>,
        host: Arc<dyn AccessoryHost>,
    ) -> Self {
        Self {
            resolver,
            context,
            host,
            accessories: RwLock::new(HashMap::new()),
            routing: AtomicBool::new(false),
        }
    }

    pub fn accessory(&self, address: &str) -> Option<MeshAccessory> {
        self.accessories.read().get(address).cloned()
    }

    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.accessories.read().keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn is_routing(&self) -> bool {
        self.routing.load(Ordering::SeqCst)
    }

    fn cleanup_devices(&self) {
        let known: HashSet<String> = self
            .resolver
            .stack()
            .devices()
            .into_iter()
            .map(|d| d.address)
            .collect();

        tracing::info!("Cleaning up any stale accessories...");
        for address in self.host.cached_addresses() {
            if known.contains(&address) {
                continue;
            }
            tracing::info!("Removing existing accessory from cache: {}", address);
            if let Err(e) = self.host.unregister(&address) {
                tracing::warn!("Failed to unregister accessory '{}': {}", address, e);
            }
        }
    }

    fn add_device(&self, device: &Device) -> Result<()> {
        if device.is_coordinator() {
            return Ok(());
        }

        let Some(entity) = self.resolver.resolve_device(device) else {
            tracing::warn!("Unrecognized device: {} ({})", device.address, device.name());
            return Ok(());
        };

        tracing::info!("Initializing device {}", device.address);
        let address = device.address.clone();

        match self.host.cached_state(&address) {
            Some(state) => {
                let accessory = MeshAccessory::with_state(
                    address.clone(),
                    Some(entity),
                    Arc::clone(&self.context),
                    state,
                    StateMap::new(),
                );
                tracing::info!(
                    "> Restoring existing accessory from cache: {} {}",
                    accessory.vendor().unwrap_or_default(),
                    accessory.description().unwrap_or_default()
                );
                self.host.update(&accessory)?;
                self.accessories.write().insert(address, accessory);
            }
            None => {
                let accessory =
                    MeshAccessory::new(address.clone(), Some(entity), Arc::clone(&self.context));
                tracing::info!(
                    "> Registering new accessory: {} {}",
                    accessory.vendor().unwrap_or_default(),
                    accessory.description().unwrap_or_default()
                );
                self.host.register(&accessory)?;
                self.accessories.write().insert(address, accessory);
            }
        }
        Ok(())
    }

    fn remove_device(&self, address: &str) -> Result<()> {
        if self.accessories.write().remove(address).is_some() {
            tracing::info!("Removing accessory from cache: {}", address);
        }
        self.host.unregister(address)
    }

    fn route(&self, message: &MeshMessage) {
        match self.accessory(&message.address) {
            Some(accessory) => accessory.process_message(message),
            None => tracing::debug!("Accessory for '{}' not found", message.address),
        }
    }
}

#[async_trait]
impl Extension for BridgeExtension {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn start(&self) -> Result<()> {
        self.routing.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.routing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn accepts(&self, event: &MeshEvent) -> bool {
        matches!(
            event,
            MeshEvent::Started
                | MeshEvent::DeviceJoined { .. }
                | MeshEvent::DeviceLeave { .. }
                | MeshEvent::Message { .. }
                | MeshEvent::AdapterDisconnected
        )
    }

    async fn handle_event(&self, event: &MeshEvent) -> Result<()> {
        match event {
            MeshEvent::Started => {
                self.cleanup_devices();
                for device in self.resolver.stack().clients() {
                    if let Err(e) = self.add_device(&device) {
                        tracing::warn!("Failed to add accessory for '{}': {}", device.address, e);
                    }
                }
            }
            MeshEvent::DeviceJoined { address } => {
                if let Some(device) = self.resolver.stack().device(address) {
                    self.add_device(&device)?;
                }
            }
            MeshEvent::DeviceLeave { address } => self.remove_device(address)?,
            MeshEvent::Message { message } => {
                if self.is_routing() {
                    self.route(message);
                }
            }
            MeshEvent::AdapterDisconnected => {
                tracing::warn!("Adapter disconnected, stopping accessory routing");
                self.routing.store(false, Ordering::SeqCst);
            }
            _ => {}
        }
        Ok(())
    }
}
