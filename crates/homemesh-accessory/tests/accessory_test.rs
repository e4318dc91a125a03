//! State engine behaviour against the mock stack.

use async_trait::async_trait;
use futures::StreamExt;
use homemesh_accessory::{AccessoryContext, MeshAccessory};
use homemesh_core::{BridgeConfig, MeshMessage, Result};
use homemesh_devices::generic::{
    Brightness, LevelDecoder, OnOff, OnOffBrightness, OnOffDecoder,
};
use homemesh_devices::{
    CapabilityDescriptor, DescriptorBuilder, Device, DeviceRole, Endpoint, MeshStack, MockCall,
    MockMeshStack, PropertySpec, ResolvedEntity, SetContext, SetResult, StackEvent, StateMap,
    ToConverter,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const ADDRESS: &str = "0x00124b0001d1";

fn map(value: Value) -> StateMap {
    value.as_object().cloned().unwrap_or_default()
}

fn light_properties(builder: DescriptorBuilder) -> DescriptorBuilder {
    builder
        .property(PropertySpec::binary("state", json!("ON"), json!("OFF")))
        .property(PropertySpec::numeric("brightness", Some(0.0), Some(254.0)))
}

/// Dimmable bulb with separate on/off and level encoders.
fn dimmable(brightness: Brightness) -> CapabilityDescriptor {
    light_properties(CapabilityDescriptor::builder("LED1623G12", "IKEA"))
        .to_converter(OnOff::new())
        .to_converter(brightness)
        .from_converter(OnOffDecoder::new())
        .from_converter(LevelDecoder::new())
        .build()
        .unwrap()
}

fn bulb() -> Device {
    Device::new(ADDRESS, DeviceRole::Router)
        .with_model("LED1623G12")
        .with_endpoint(Endpoint::new(1))
}

struct Harness {
    stack: Arc<MockMeshStack>,
    accessory: MeshAccessory,
    _router: JoinHandle<()>,
}

async fn harness_with(
    descriptor: CapabilityDescriptor,
    device: Device,
    config: BridgeConfig,
    state: StateMap,
) -> Harness {
    let stack = Arc::new(MockMeshStack::new().with_device(device.clone()));
    stack.start().await.unwrap();
    let context = Arc::new(AccessoryContext::new(stack.clone(), config));
    let entity = Arc::new(ResolvedEntity::new(device, Arc::new(descriptor)));
    let accessory = MeshAccessory::with_state(ADDRESS, Some(entity), context, state, StateMap::new());

    // Stands in for the bridge routing stack messages to the accessory
    let mut events = stack.subscribe();
    let routed = accessory.clone();
    let router = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if let StackEvent::Message(message) = event {
                routed.process_message(&message);
            }
        }
    });

    Harness {
        stack,
        accessory,
        _router: router,
    }
}

async fn harness() -> Harness {
    harness_with(
        dimmable(Brightness::new()),
        bulb(),
        BridgeConfig::default(),
        StateMap::new(),
    )
    .await
}

/// Let background writes run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

fn commands(stack: &MockMeshStack) -> Vec<(String, String)> {
    stack
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            MockCall::Command {
                cluster, command, ..
            } => Some((cluster, command)),
            _ => None,
        })
        .collect()
}

fn on_off_reply(call: &MockCall) -> Option<MeshMessage> {
    match call {
        MockCall::Read {
            address,
            endpoint,
            cluster,
            ..
        } if cluster == "genOnOff" => Some(MeshMessage::new(
            address.clone(),
            *endpoint,
            "genOnOff",
            "readResponse",
            json!({"onOff": 0}),
        )),
        _ => None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_turning_off_sends_state_before_brightness() {
    let h = harness().await;

    h.accessory
        .set_state(map(json!({"state": "OFF", "brightness": 50})), StateMap::new());
    settle().await;

    assert_eq!(
        commands(&h.stack),
        [
            ("genOnOff".to_string(), "off".to_string()),
            ("genLevelCtrl".to_string(), "moveToLevel".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_turning_on_sends_brightness_first() {
    let h = harness().await;

    h.accessory
        .set_state(map(json!({"state": "ON", "brightness": 50})), StateMap::new());
    settle().await;

    assert_eq!(
        commands(&h.stack),
        [
            ("genLevelCtrl".to_string(), "moveToLevel".to_string()),
            ("genOnOff".to_string(), "on".to_string()),
        ]
    );
    let state = h.accessory.state();
    assert_eq!(state["state"], json!("ON"));
    assert_eq!(state["brightness"], json!(50));
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_write_is_announced() {
    let h = harness().await;
    let mut rx = h.accessory.subscribe_state().unwrap();
    assert!(h.accessory.subscribe_state().is_none());

    let returned = h
        .accessory
        .set_state(map(json!({"state": "ON"})), StateMap::new());
    // Writes are not awaited
    assert!(returned.is_empty());
    settle().await;

    assert_eq!(rx.try_recv().unwrap(), map(json!({"state": "ON"})));
}

struct Counting {
    keys: Vec<String>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ToConverter for Counting {
    fn keys(&self) -> &[String] {
        &self.keys
    }

    async fn convert_set(&self, _ctx: &SetContext<'_>) -> Result<Option<SetResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

#[tokio::test(start_paused = true)]
async fn test_converter_runs_once_per_endpoint_per_call() {
    let calls = Arc::new(AtomicUsize::new(0));
    let descriptor = light_properties(CapabilityDescriptor::builder("TS0502", "Tuya"))
        .to_converter(Counting {
            keys: vec!["state".to_string(), "brightness".to_string()],
            calls: calls.clone(),
        })
        .endpoint("left", 1)
        .endpoint("right", 2)
        .build()
        .unwrap();
    let device = Device::new(ADDRESS, DeviceRole::Router)
        .with_model("TS0502")
        .with_endpoint(Endpoint::new(1))
        .with_endpoint(Endpoint::new(2));
    let h = harness_with(descriptor, device, BridgeConfig::default(), StateMap::new()).await;

    let props = map(json!({"state_left": "ON", "brightness_left": 10, "state_right": "ON"}));
    h.accessory.set_state(props.clone(), StateMap::new());
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Deduplication does not carry over between calls
    h.accessory.set_state(props, StateMap::new());
    settle().await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_unusable_properties_skipped() {
    let h = harness().await;

    // No converter, invalid value, unknown endpoint; only brightness goes out
    h.accessory.set_state(
        map(json!({
            "color_temp": 300,
            "state": "dim",
            "state_l4": "ON",
            "brightness": 20,
        })),
        StateMap::new(),
    );
    settle().await;

    assert_eq!(
        commands(&h.stack),
        [("genLevelCtrl".to_string(), "moveToLevel".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_read_only_property_not_written() {
    let descriptor = CapabilityDescriptor::builder("LED1623G12", "IKEA")
        .property(PropertySpec::binary("state", json!("ON"), json!("OFF")).read_only())
        .to_converter(OnOff::new())
        .build()
        .unwrap();
    let h = harness_with(descriptor, bulb(), BridgeConfig::default(), StateMap::new()).await;

    h.accessory.set_state(map(json!({"state": "ON"})), StateMap::new());
    settle().await;
    assert!(h.stack.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_get_state_merges_reply_without_announcing() {
    let h = harness().await;
    let mut rx = h.accessory.subscribe_state().unwrap();
    h.stack.set_read_responder(on_off_reply);

    let state = h
        .accessory
        .get_state(map(json!({"state": true})), StateMap::new())
        .await
        .unwrap();

    assert_eq!(state["state"], json!("OFF"));
    assert_eq!(h.accessory.state()["state"], json!("OFF"));
    assert!(rx.try_recv().is_err());
}

fn light_reply(call: &MockCall) -> Option<MeshMessage> {
    let MockCall::Read {
        address,
        endpoint,
        cluster,
        ..
    } = call
    else {
        return None;
    };
    let data = match cluster.as_str() {
        "genOnOff" => json!({"onOff": 1}),
        "genLevelCtrl" => json!({"currentLevel": 77}),
        _ => return None,
    };
    Some(MeshMessage::new(
        address.clone(),
        *endpoint,
        cluster.clone(),
        "readResponse",
        data,
    ))
}

#[tokio::test(start_paused = true)]
async fn test_get_state_reads_every_key_of_combined_converter() {
    let descriptor = light_properties(CapabilityDescriptor::builder("LED1623G12", "IKEA"))
        .to_converter(OnOffBrightness::new())
        .from_converter(OnOffDecoder::new())
        .from_converter(LevelDecoder::new())
        .build()
        .unwrap();
    let h = harness_with(descriptor, bulb(), BridgeConfig::default(), StateMap::new()).await;
    h.stack.set_read_responder(light_reply);

    let state = h
        .accessory
        .get_state(map(json!({"state": true, "brightness": true})), StateMap::new())
        .await
        .unwrap();

    assert_eq!(state.get("state"), Some(&json!("ON")));
    assert_eq!(state.get("brightness"), Some(&json!(77)));
    let reads = h
        .stack
        .calls()
        .into_iter()
        .filter(|c| matches!(c, MockCall::Read { .. }))
        .count();
    assert_eq!(reads, 2);
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_device_does_not_hold_up_other_reads() {
    const SLOW: &str = "0x00124b0001d2";
    let descriptor = Arc::new(dimmable(Brightness::new()));
    let slow_device = Device::new(SLOW, DeviceRole::Router)
        .with_model("LED1623G12")
        .with_endpoint(Endpoint::new(1));
    let stack = Arc::new(
        MockMeshStack::new()
            .with_device(bulb())
            .with_device(slow_device.clone()),
    );
    stack.start().await.unwrap();
    stack.set_read_responder(on_off_reply);
    stack.set_read_delay(SLOW, Duration::from_secs(60));

    let context = Arc::new(AccessoryContext::new(stack.clone(), BridgeConfig::default()));
    let fast = MeshAccessory::new(
        ADDRESS,
        Some(Arc::new(ResolvedEntity::new(bulb(), descriptor.clone()))),
        context.clone(),
    );
    let slow = MeshAccessory::new(
        SLOW,
        Some(Arc::new(ResolvedEntity::new(slow_device, descriptor))),
        context,
    );

    let mut events = stack.subscribe();
    let routed = fast.clone();
    let _router = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if let StackEvent::Message(message) = event {
                if message.address == ADDRESS {
                    routed.process_message(&message);
                }
            }
        }
    });

    let slow_read = tokio::spawn(async move {
        slow.get_state(map(json!({"state": true})), StateMap::new()).await
    });
    settle().await;

    let started = tokio::time::Instant::now();
    let state = fast
        .get_state(map(json!({"state": true})), StateMap::new())
        .await
        .unwrap();

    assert_eq!(state.get("state"), Some(&json!("OFF")));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!slow_read.is_finished());
}

#[tokio::test(start_paused = true)]
async fn test_get_state_times_out_and_leaves_state() {
    let h = harness_with(
        dimmable(Brightness::new()),
        bulb(),
        BridgeConfig::default(),
        map(json!({"state": "ON"})),
    )
    .await;

    let started = tokio::time::Instant::now();
    let err = h
        .accessory
        .get_state(map(json!({"state": true})), StateMap::new())
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    let elapsed = started.elapsed().as_millis();
    assert!((2000..2100).contains(&elapsed), "elapsed {}ms", elapsed);
    assert_eq!(h.accessory.state(), map(json!({"state": "ON"})));
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_handled_as_report() {
    let h = harness().await;
    let mut rx = h.accessory.subscribe_state().unwrap();

    assert!(h
        .accessory
        .get_state(map(json!({"state": true})), StateMap::new())
        .await
        .is_err());

    let tsn = h.stack.calls()[0].transaction_sequence().unwrap();
    let late = MeshMessage::new(ADDRESS, 1, "genOnOff", "readResponse", json!({"onOff": 1}))
        .with_transaction_sequence(tsn);
    h.accessory.process_message(&late);

    assert_eq!(h.accessory.state()["state"], json!("ON"));
    assert_eq!(rx.try_recv().unwrap(), map(json!({"state": "ON"})));
}

#[tokio::test(start_paused = true)]
async fn test_get_state_fails_when_read_cannot_be_sent() {
    let h = harness().await;
    h.stack.set_unreachable(ADDRESS, true);

    let err = h
        .accessory
        .get_state(map(json!({"brightness": true})), StateMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, homemesh_core::Error::Mesh(_)));
}

#[tokio::test(start_paused = true)]
async fn test_unsolicited_report_decoded_and_announced() {
    let h = harness().await;
    let mut rx = h.accessory.subscribe_state().unwrap();

    let report = MeshMessage::new(ADDRESS, 1, "genLevelCtrl", "attributeReport", json!({"currentLevel": 99}));
    h.accessory.process_message(&report);

    assert_eq!(rx.try_recv().unwrap(), map(json!({"brightness": 99})));
    assert_eq!(h.accessory.state()["brightness"], json!(99));
}

#[tokio::test(start_paused = true)]
async fn test_read_after_write_when_enabled() {
    let h = harness_with(
        dimmable(Brightness::new().with_read_after_write(Duration::from_secs(1))),
        bulb(),
        BridgeConfig::default().with_retrieve_state(true),
        StateMap::new(),
    )
    .await;

    h.accessory
        .set_state(map(json!({"brightness": 80})), StateMap::new());
    settle().await;
    assert_eq!(h.stack.calls().len(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let calls = h.stack.calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(
        &calls[1],
        MockCall::Read { cluster, .. } if cluster == "genLevelCtrl"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_no_read_after_write_when_disabled() {
    let h = harness_with(
        dimmable(Brightness::new().with_read_after_write(Duration::from_secs(1))),
        bulb(),
        BridgeConfig::default(),
        StateMap::new(),
    )
    .await;

    h.accessory
        .set_state(map(json!({"brightness": 80})), StateMap::new());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.stack.calls().len(), 1);
}

#[tokio::test]
async fn test_unresolved_accessory_returns_cached_state() {
    let stack = Arc::new(MockMeshStack::new());
    let context = Arc::new(AccessoryContext::new(stack.clone(), BridgeConfig::default()));
    let accessory = MeshAccessory::with_state(
        "0xdead",
        None,
        context,
        map(json!({"state": "ON"})),
        StateMap::new(),
    );

    assert_eq!(
        accessory.set_state(map(json!({"state": "OFF"})), StateMap::new()),
        map(json!({"state": "ON"}))
    );
    assert_eq!(
        accessory
            .get_state(map(json!({"state": true})), StateMap::new())
            .await
            .unwrap(),
        map(json!({"state": "ON"}))
    );
    assert!(stack.calls().is_empty());
}
