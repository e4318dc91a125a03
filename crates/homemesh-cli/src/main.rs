//! Command-line front end for the HomeMesh bridge core.
//!
//! `run` drives the bridge against a simulated mesh network, which is the
//! quickest way to watch the event flow and converter logs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use homemesh_core::logging::{init_tracing, DEFAULT_FILTER};
use homemesh_core::message::{clusters, message_types};
use homemesh_core::{BridgeConfig, MeshMessage};
use homemesh_devices::generic::{
    Brightness, ColorTemp, ColorTempDecoder, LevelDecoder, OnOff, OnOffDecoder,
};
use homemesh_devices::{
    CapabilityDescriptor, Device, DeviceRole, Endpoint, MockCall, MockMeshStack, PowerSource,
    PropertySpec, StackEvent, StateMap, StaticDescriptorRegistry,
};
use homemesh_extensions::{MemoryAccessoryHost, MeshBridge};
use serde_json::json;

const PLUG: &str = "0x00124b0001aa0001";
const BULB: &str = "0x000d6ffffe2b0002";

/// HomeMesh mesh-to-accessory bridge.
#[derive(Parser, Debug)]
#[command(name = "homemesh")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// JSON configuration file. `HOMEMESH_*` variables are used when absent.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge against a simulated network.
    Run {
        /// Allow devices to join.
        #[arg(long)]
        permit_join: bool,
        /// Stop after this many seconds instead of waiting for Ctrl-C.
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Validate the configuration and print it.
    CheckConfig,
}

fn load_config(path: Option<&PathBuf>) -> Result<BridgeConfig> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            BridgeConfig::from_json_str(&text)
                .with_context(|| format!("invalid configuration in {}", path.display()))?
        }
        None => {
            let config = BridgeConfig::from_env();
            config.validate()?;
            config
        }
    };
    Ok(config)
}

fn simulated_network() -> Result<(Arc<MockMeshStack>, StaticDescriptorRegistry)> {
    let plug = CapabilityDescriptor::builder("E11-N1EA", "Sengled")
        .description("Element plus smart plug")
        .property(PropertySpec::binary("state", json!("ON"), json!("OFF")))
        .to_converter(OnOff::new())
        .from_converter(OnOffDecoder::new())
        .build()?;
    let bulb = CapabilityDescriptor::builder("LED1545G12", "IKEA")
        .description("TRADFRI LED bulb E26/E27 980 lumen, white spectrum")
        .property(PropertySpec::binary("state", json!("ON"), json!("OFF")))
        .property(PropertySpec::numeric("brightness", Some(0.0), Some(254.0)))
        .property(PropertySpec::numeric("color_temp", Some(250.0), Some(454.0)))
        .to_converter(OnOff::new())
        .to_converter(Brightness::new().with_read_after_write(Duration::from_millis(500)))
        .to_converter(ColorTemp::new())
        .from_converter(OnOffDecoder::new())
        .from_converter(LevelDecoder::new())
        .from_converter(ColorTempDecoder::new())
        .build()?;
    let registry = StaticDescriptorRegistry::new()
        .with_descriptor(plug)
        .with_descriptor(bulb);

    let stack = Arc::new(
        MockMeshStack::new()
            .with_device(Device::coordinator("0x00124b0000000000"))
            .with_device(
                Device::new(PLUG, DeviceRole::Router)
                    .with_model("E11-N1EA")
                    .with_power_source(PowerSource::Mains)
                    .with_endpoint(Endpoint::new(1).with_input_clusters([clusters::ON_OFF])),
            )
            .with_device(
                Device::new(BULB, DeviceRole::Router)
                    .with_model("LED1545G12")
                    .with_manufacturer("IKEA of Sweden")
                    .with_power_source(PowerSource::Mains)
                    .with_endpoint(
                        Endpoint::new(1)
                            .with_input_clusters([
                                clusters::ON_OFF,
                                clusters::LEVEL_CONTROL,
                                clusters::COLOR_CONTROL,
                            ])
                            .with_output_clusters([clusters::OTA]),
                    ),
            ),
    );

    // Every read is answered as if the device were on at full brightness
    stack.set_read_responder(|call| {
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
            clusters::ON_OFF => json!({ "onOff": 1 }),
            clusters::LEVEL_CONTROL => json!({ "currentLevel": 254 }),
            clusters::COLOR_CONTROL => json!({ "colorTemperature": 370 }),
            _ => return None,
        };
        Some(MeshMessage::new(
            address.clone(),
            *endpoint,
            cluster.clone(),
            message_types::READ_RESPONSE,
            data,
        ))
    });

    Ok((stack, registry))
}

fn properties(value: serde_json::Value) -> StateMap {
    match value {
        serde_json::Value::Object(map) => map,
        _ => StateMap::new(),
    }
}

async fn run(config: BridgeConfig, duration: Option<Duration>) -> Result<()> {
    let (stack, registry) = simulated_network()?;
    let host = Arc::new(MemoryAccessoryHost::new());
    let bridge = MeshBridge::new(stack.clone(), Arc::new(registry), host, config)?;
    bridge.start().await?;

    // Give the extensions a moment to build accessories
    tokio::time::sleep(Duration::from_millis(100)).await;

    if let Some(bulb) = bridge.accessory(BULB) {
        bulb.set_state(
            properties(json!({ "state": "ON", "brightness": 128, "color_temp": 300 })),
            StateMap::new(),
        );
        match bulb
            .get_state(properties(json!({ "state": true })), StateMap::new())
            .await
        {
            Ok(state) => tracing::info!("'{}' state: {:?}", bulb.name(), state),
            Err(e) => tracing::warn!("Failed to read '{}': {}", bulb.name(), e),
        }
    }

    stack.emit(StackEvent::Message(MeshMessage::new(
        PLUG,
        1,
        clusters::ON_OFF,
        message_types::ATTRIBUTE_REPORT,
        json!({ "onOff": 0 }),
    )));

    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => {
            tracing::info!("Press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
        }
    }

    for address in [PLUG, BULB] {
        if let Some(accessory) = bridge.accessory(address) {
            println!("{} ({}): {}", accessory.name(), address, json!(accessory.state()));
        }
    }

    bridge.stop().await?;
    Ok(())
}

// Reads are correlated by peeked transaction sequence numbers, which
// requires sends to be numbered on a single thread.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(if args.verbose {
        "homemesh=debug"
    } else {
        DEFAULT_FILTER
    });

    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Run {
            permit_join,
            duration_secs,
        } => {
            let config = if permit_join {
                config.with_permit_join(true)
            } else {
                config
            };
            run(config, duration_secs.map(Duration::from_secs)).await
        }
        Command::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
