//! Resources shared by every accessory of one bridge.

use homemesh_commands::CorrelationQueue;
use homemesh_core::{BridgeConfig, MeshMessage};
use homemesh_devices::MeshStack;
use std::sync::Arc;

/// Stack handle, correlation queue and settings shared across accessories.
pub struct AccessoryContext {
    stack: Arc<dyn MeshStack>,
    queue: CorrelationQueue<MeshMessage>,
    config: BridgeConfig,
}

impl AccessoryContext {
    pub fn new(stack: Arc<dyn MeshStack>, config: BridgeConfig) -> Self {
        Self {
            queue: CorrelationQueue::new(config.correlation_timeout()),
            stack,
            config,
        }
    }

    pub fn stack(&self) -> &Arc<dyn MeshStack> {
        &self.stack
    }

    pub fn queue(&self) -> &CorrelationQueue<MeshMessage> {
        &self.queue
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}
