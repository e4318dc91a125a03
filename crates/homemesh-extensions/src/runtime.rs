//! Bridge composition root.

use crate::bridge::BridgeExtension;
use crate::configure::ConfigureExtension;
use crate::error::Result;
use crate::extension::{Extension, ExtensionManager};
use crate::host::AccessoryHost;
use crate::on_event::OnEventExtension;
use crate::ota::OtaExtension;
use crate::ping::PingExtension;
use homemesh_accessory::{AccessoryContext, MeshAccessory};
use homemesh_core::{BridgeConfig, EventBus, SharedEventBus};
use homemesh_devices::{DescriptorRegistry, EntityResolver, MeshController, MeshStack};
use std::sync::Arc;

/// Wires the controller, the accessory context and the standard extensions
/// around one mesh stack.
pub struct MeshBridge {
    config: BridgeConfig,
    event_bus: SharedEventBus,
    resolver: Arc<EntityResolver>,
    controller: MeshController,
    manager: ExtensionManager,
    bridge: Arc<BridgeExtension>,
    configure: ConfigureExtension,
    ping: PingExtension,
}

impl MeshBridge {
    pub fn new(
        stack: Arc<dyn MeshStack>,
        registry: Arc<dyn DescriptorRegistry>,
        host: Arc<dyn AccessoryHost>,
        config: BridgeConfig,
    ) -> Result<Self> {
        config.validate()?;

        let event_bus: SharedEventBus = Arc::new(
            EventBus::with_capacity(config.event_bus_capacity).with_name("homemesh"),
        );
        let resolver = Arc::new(EntityResolver::new(Arc::clone(&stack), registry));
        let context = Arc::new(AccessoryContext::new(Arc::clone(&stack), config.clone()));
        let controller = MeshController::new(
            Arc::clone(&stack),
            Arc::clone(&resolver),
            Arc::clone(&event_bus),
            config.clone(),
        );

        let bridge = Arc::new(BridgeExtension::new(Arc::clone(&resolver), context, host));
        let configure = ConfigureExtension::new(Arc::clone(&resolver), config.configure_max_attempts);
        let ping = PingExtension::new(Arc::clone(&resolver), config.ping_interval());
        let ota = OtaExtension::new(Arc::clone(&resolver), config.ota_check_interval())
            .with_automatic_check(!config.ota_disable_automatic_update_check);
        let on_event = OnEventExtension::new(Arc::clone(&resolver));

        let manager = ExtensionManager::new(Arc::clone(&event_bus));
        let extensions: [Arc<dyn Extension>; 5] = [
            bridge.clone(),
            Arc::new(configure.clone()),
            Arc::new(ping.clone()),
            Arc::new(ota),
            Arc::new(on_event),
        ];
        for extension in extensions {
            manager.register(extension)?;
        }

        Ok(Self {
            config,
            event_bus,
            resolver,
            controller,
            manager,
            bridge,
            configure,
            ping,
        })
    }

    /// Start extensions first so none of them miss `Started`.
    pub async fn start(&self) -> Result<()> {
        self.manager.start_all().await?;
        if let Err(e) = self.controller.start().await {
            self.manager.abort_all().await;
            return Err(e.into());
        }
        tracing::info!("HomeMesh bridge started");
        Ok(())
    }

    /// Extensions handle `Stop` before the stack goes down.
    pub async fn stop(&self) -> Result<()> {
        self.controller.announce_stop().await;
        self.manager.stop_all().await;
        let outcome = self.controller.stop_stack().await;
        tracing::info!("HomeMesh bridge stopped");
        outcome.map_err(Into::into)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &SharedEventBus {
        &self.event_bus
    }

    pub fn resolver(&self) -> &Arc<EntityResolver> {
        &self.resolver
    }

    pub fn controller(&self) -> &MeshController {
        &self.controller
    }

    pub fn extension_names(&self) -> Vec<String> {
        self.manager.names()
    }

    pub fn accessory(&self, address: &str) -> Option<MeshAccessory> {
        self.bridge.accessory(address)
    }

    pub fn configure(&self) -> &ConfigureExtension {
        &self.configure
    }

    pub fn ping(&self) -> &PingExtension {
        &self.ping
    }
}
