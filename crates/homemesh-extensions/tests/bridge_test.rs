//! Accessory lifecycle, routing and the composed bridge.

mod common;

use common::*;
use homemesh_accessory::AccessoryContext;
use homemesh_core::message::{clusters, message_types};
use homemesh_core::{BridgeConfig, MeshEvent};
use homemesh_devices::{MockCall, StackEvent, StaticDescriptorRegistry};
use homemesh_extensions::{
    AccessoryHost, BridgeExtension, Extension, MemoryAccessoryHost, MeshBridge,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn on_off(address: &str, on: u64) -> MeshEvent {
    message(
        address,
        clusters::ON_OFF,
        message_types::ATTRIBUTE_REPORT,
        json!({ "onOff": on }),
    )
}

async fn bridge_harness(host: MemoryAccessoryHost) -> (Harness, Arc<MemoryAccessoryHost>, BridgeExtension) {
    let h = harness(vec![plug_descriptor().build().unwrap()], vec![plug(PLUG)]).await;
    let host = Arc::new(host);
    let context = Arc::new(AccessoryContext::new(h.stack.clone(), BridgeConfig::default()));
    let bridge = BridgeExtension::new(h.resolver.clone(), context, host.clone());
    bridge.start().await.unwrap();
    (h, host, bridge)
}

#[tokio::test]
async fn test_started_cleans_cache_and_registers_clients() {
    let host = MemoryAccessoryHost::new().with_cached("0x99", Default::default());
    let (_h, host, bridge) = bridge_harness(host).await;

    bridge.handle_event(&MeshEvent::Started).await.unwrap();

    assert_eq!(host.cached_addresses(), vec![PLUG.to_string()]);
    assert_eq!(host.registered(), vec![PLUG.to_string()]);
    // Coordinator never gets an accessory
    assert_eq!(bridge.addresses(), vec![PLUG.to_string()]);
}

#[tokio::test]
async fn test_cached_accessory_restored_with_state() {
    let mut cached = serde_json::Map::new();
    cached.insert("state".into(), json!("ON"));
    let host = MemoryAccessoryHost::new().with_cached(PLUG, cached);
    let (_h, host, bridge) = bridge_harness(host).await;

    bridge
        .handle_event(&MeshEvent::DeviceJoined {
            address: PLUG.into(),
        })
        .await
        .unwrap();

    let accessory = bridge.accessory(PLUG).unwrap();
    assert_eq!(accessory.state().get("state"), Some(&json!("ON")));
    assert!(host.accessory(PLUG).is_some());
}

#[tokio::test]
async fn test_unrecognized_device_skipped() {
    let (h, host, bridge) = bridge_harness(MemoryAccessoryHost::new()).await;
    let mut unknown = plug("0x51");
    unknown.model_id = Some("mystery".into());
    h.stack.add_device(unknown);

    bridge
        .handle_event(&MeshEvent::DeviceJoined {
            address: "0x51".into(),
        })
        .await
        .unwrap();
    assert!(bridge.accessory("0x51").is_none());
    assert!(host.registered().is_empty());
}

#[tokio::test]
async fn test_messages_routed_until_adapter_disconnects() {
    let (_h, _host, bridge) = bridge_harness(MemoryAccessoryHost::new()).await;
    bridge.handle_event(&MeshEvent::Started).await.unwrap();
    let accessory = bridge.accessory(PLUG).unwrap();

    bridge.handle_event(&on_off(PLUG, 1)).await.unwrap();
    assert_eq!(accessory.state().get("state"), Some(&json!("ON")));

    // Unknown sender is ignored
    bridge.handle_event(&on_off("0x77", 1)).await.unwrap();

    bridge
        .handle_event(&MeshEvent::AdapterDisconnected)
        .await
        .unwrap();
    assert!(!bridge.is_routing());
    bridge.handle_event(&on_off(PLUG, 0)).await.unwrap();
    assert_eq!(accessory.state().get("state"), Some(&json!("ON")));
}

#[tokio::test]
async fn test_leave_unregisters() {
    let (_h, host, bridge) = bridge_harness(MemoryAccessoryHost::new()).await;
    bridge.handle_event(&MeshEvent::Started).await.unwrap();

    bridge
        .handle_event(&MeshEvent::DeviceLeave {
            address: PLUG.into(),
        })
        .await
        .unwrap();
    assert!(bridge.accessory(PLUG).is_none());
    assert!(host.registered().is_empty());
    assert!(host.cached_addresses().is_empty());
}

#[tokio::test]
async fn test_mesh_bridge_end_to_end() {
    let stack = Arc::new(homemesh_devices::MockMeshStack::new().with_device(
        homemesh_devices::Device::coordinator("0x00"),
    ));
    stack.add_device(plug(PLUG));
    let registry =
        Arc::new(StaticDescriptorRegistry::new().with_descriptor(plug_descriptor().build().unwrap()));
    let host = Arc::new(MemoryAccessoryHost::new());
    let bridge = MeshBridge::new(
        stack.clone(),
        registry,
        host.clone(),
        BridgeConfig::default(),
    )
    .unwrap();
    assert_eq!(
        bridge.extension_names(),
        ["bridge", "configure", "ping", "ota", "on_event"]
    );

    bridge.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let accessory = bridge.accessory(PLUG).expect("accessory created at start");
    assert_eq!(host.registered(), vec![PLUG.to_string()]);
    assert!(stack.calls().contains(&MockCall::PermitJoin(false)));

    // Reports flow stack -> controller -> bus -> bridge -> accessory
    stack.emit(StackEvent::Message(homemesh_core::MeshMessage::new(
        PLUG,
        1,
        clusters::ON_OFF,
        message_types::ATTRIBUTE_REPORT,
        json!({ "onOff": 1 }),
    )));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(accessory.state().get("state"), Some(&json!("ON")));

    bridge.stop().await.unwrap();
    assert!(!bridge.controller().is_forwarding());
}
