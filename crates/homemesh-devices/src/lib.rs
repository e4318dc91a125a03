//! Device side of the HomeMesh bridge.
//!
//! - `mesh`: the radio stack interface, `mock` an in-memory stand-in
//! - `model`: devices and endpoints as the stack reports them
//! - `descriptor` / `schema` / `converter`: per-model capability descriptors
//! - `generic`: stock lighting converters
//! - `registry` / `resolver`: device to descriptor resolution
//! - `decoder`: inbound message decoding
//! - `controller`: stack lifecycle and event forwarding

pub mod controller;
pub mod converter;
pub mod decoder;
pub mod descriptor;
pub mod generic;
pub mod mesh;
pub mod mock;
pub mod model;
pub mod registry;
pub mod resolver;
pub mod schema;

pub use controller::MeshController;
pub use converter::{
    DecodeContext, FromConverter, GetContext, SetContext, SetResult, StateMap, ToConverter,
};
pub use decoder::decode_message;
pub use descriptor::{
    CapabilityDescriptor, ConfigureHook, DescriptorBuilder, DescriptorError, OnEventHook, OtaHook,
};
pub use mesh::{MeshError, MeshResult, MeshStack, StackEvent, StackEventStream, TransactionSequence};
pub use mock::{MockCall, MockMeshStack};
pub use model::{Device, DeviceRole, Endpoint, PowerSource};
pub use registry::{DescriptorRegistry, StaticDescriptorRegistry};
pub use resolver::{EntityResolver, ResolvedEntity};
pub use schema::{Access, PropertyKind, PropertySchema, PropertySpec};
