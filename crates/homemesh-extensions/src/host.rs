//! Accessory host platform seam.

use crate::error::{ExtensionError, Result};
use homemesh_accessory::MeshAccessory;
use homemesh_devices::StateMap;
use parking_lot::RwLock;
use std::collections::HashMap;

/// The platform that presents accessories to the user.
///
/// The host owns accessory lifecycle and keeps a cache of previously
/// registered accessories (with their last known state) across restarts.
pub trait AccessoryHost: Send + Sync {
    /// Addresses of accessories restored from the host cache.
    fn cached_addresses(&self) -> Vec<String>;

    /// Last known state for a cached accessory.
    fn cached_state(&self, address: &str) -> Option<StateMap>;

    fn register(&self, accessory: &MeshAccessory) -> Result<()>;

    /// Refresh an accessory that was restored from the cache.
    fn update(&self, accessory: &MeshAccessory) -> Result<()>;

    fn unregister(&self, address: &str) -> Result<()>;
}

/// In-memory host, used by the demo binary and tests.
#[derive(Default)]
pub struct MemoryAccessoryHost {
    cache: RwLock<HashMap<String, StateMap>>,
    accessories: RwLock<HashMap<String, MeshAccessory>>,
}

impl MemoryAccessoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cache as if restored from a previous run.
    pub fn with_cached(self, address: impl Into<String>, state: StateMap) -> Self {
        self.cache.write().insert(address.into(), state);
        self
    }

    pub fn accessory(&self, address: &str) -> Option<MeshAccessory> {
        self.accessories.read().get(address).cloned()
    }

    pub fn registered(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.accessories.read().keys().cloned().collect();
        addresses.sort();
        addresses
    }
}

impl AccessoryHost for MemoryAccessoryHost {
    fn cached_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.cache.read().keys().cloned().collect();
        addresses.sort();
        addresses
    }

    fn cached_state(&self, address: &str) -> Option<StateMap> {
        self.cache.read().get(address).cloned()
    }

    fn register(&self, accessory: &MeshAccessory) -> Result<()> {
        let address = accessory.address().to_string();
        if self.accessories.read().contains_key(&address) {
            return Err(ExtensionError::Host(format!(
                "accessory '{}' is already registered",
                address
            )));
        }
        self.cache.write().insert(address.clone(), accessory.state());
        self.accessories.write().insert(address, accessory.clone());
        Ok(())
    }

    fn update(&self, accessory: &MeshAccessory) -> Result<()> {
        let address = accessory.address().to_string();
        self.cache.write().insert(address.clone(), accessory.state());
        self.accessories.write().insert(address, accessory.clone());
        Ok(())
    }

    fn unregister(&self, address: &str) -> Result<()> {
        self.accessories.write().remove(address);
        self.cache.write().remove(address);
        Ok(())
    }
}
