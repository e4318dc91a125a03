//! Accessory state engine.
//!
//! A `MeshAccessory` owns the state context of one device and exposes the
//! three operations the accessory host needs: `set_state`, `get_state` and
//! `process_message`.

pub mod accessory;
pub mod context;
pub mod ordering;
pub mod target;

pub use accessory::MeshAccessory;
pub use context::AccessoryContext;
pub use ordering::order_properties;
pub use target::{publish_target, split_endpoint, PublishTarget};
