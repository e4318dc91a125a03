//! Bridge extensions.
//!
//! Extensions are event-bus subscribers with their own per-device
//! scheduling state:
//! - `bridge`: accessory lifecycle and message routing
//! - `configure`: one-time device configuration with an attempt cap
//! - `ping`: liveness probes for routers and known flaky devices
//! - `ota`: next-image query answers with throttled upstream checks
//! - `on_event`: descriptor event hooks
//!
//! `MeshBridge` wires them together with the mesh controller.

pub mod bridge;
pub mod configure;
pub mod error;
pub mod extension;
pub mod host;
pub mod on_event;
pub mod ota;
pub mod ping;
pub mod runtime;

pub use bridge::BridgeExtension;
pub use configure::ConfigureExtension;
pub use error::{ExtensionError, Result};
pub use extension::{Extension, ExtensionManager};
pub use host::{AccessoryHost, MemoryAccessoryHost};
pub use on_event::OnEventExtension;
pub use ota::{OtaExtension, STATUS_ABORT, STATUS_NO_IMAGE_AVAILABLE};
pub use ping::{is_pingable, PingExtension, PINGABLE_MODELS};
pub use runtime::MeshBridge;
