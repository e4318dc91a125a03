//! Converter interfaces.
//!
//! Converters come from a per-model capability descriptor. A `ToConverter`
//! encodes property writes and reads into stack commands, a `FromConverter`
//! decodes inbound messages into property deltas.

use crate::mesh::MeshStack;
use crate::model::Device;
use async_trait::async_trait;
use homemesh_core::{Error, MeshMessage, Result};
use serde_json::Value;
use std::time::Duration;

/// Property name to value mapping.
pub type StateMap = serde_json::Map<String, Value>;

/// Inputs for encoding a property write.
pub struct SetContext<'a> {
    pub stack: &'a dyn MeshStack,
    pub device: &'a Device,
    /// Target endpoint ID
    pub endpoint: u8,
    /// Endpoint name when the property carried a suffix
    pub endpoint_name: Option<&'a str>,
    /// Property key with any endpoint suffix removed
    pub key: &'a str,
    pub value: &'a Value,
    /// The whole property map of this write
    pub message: &'a StateMap,
    /// Accessory state when the write was issued
    pub state: &'a StateMap,
    pub options: &'a StateMap,
}

/// Inputs for issuing a property read.
pub struct GetContext<'a> {
    pub stack: &'a dyn MeshStack,
    pub device: &'a Device,
    pub endpoint: u8,
    pub endpoint_name: Option<&'a str>,
    pub key: &'a str,
    pub state: &'a StateMap,
    pub options: &'a StateMap,
}

/// What a confirmed write reports back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetResult {
    /// State the device is now known to be in
    pub state: StateMap,
    /// Settle time after which a read resynchronizes the value
    pub read_after_write: Option<Duration>,
}

impl SetResult {
    pub fn with_state(state: StateMap) -> Self {
        Self {
            state,
            read_after_write: None,
        }
    }

    pub fn with_read_after_write(mut self, delay: Duration) -> Self {
        self.read_after_write = Some(delay);
        self
    }
}

/// Encoder for outbound property writes and reads.
#[async_trait]
pub trait ToConverter: Send + Sync {
    /// Property keys this converter handles.
    fn keys(&self) -> &[String];

    fn handles(&self, key: &str) -> bool {
        self.keys().iter().any(|k| k == key)
    }

    fn supports_set(&self) -> bool {
        true
    }

    fn supports_get(&self) -> bool {
        true
    }

    async fn convert_set(&self, _ctx: &SetContext<'_>) -> Result<Option<SetResult>> {
        Err(Error::converter("set is not supported"))
    }

    async fn convert_get(&self, _ctx: &GetContext<'_>) -> Result<()> {
        Err(Error::converter("get is not supported"))
    }
}

/// Inputs for decoding an inbound message.
pub struct DecodeContext<'a> {
    pub device: &'a Device,
    pub endpoint_name: Option<&'a str>,
    pub state: &'a StateMap,
    pub options: &'a StateMap,
}

/// Decoder for inbound messages of one cluster.
pub trait FromConverter: Send + Sync {
    fn cluster(&self) -> &str;

    fn message_types(&self) -> &[String];

    /// Properties this decoder may produce.
    fn keys(&self) -> &[String] {
        &[]
    }

    fn matches(&self, message: &MeshMessage) -> bool {
        self.cluster() == message.cluster
            && self
                .message_types()
                .iter()
                .any(|t| *t == message.message_type)
    }

    fn convert(&self, message: &MeshMessage, ctx: &DecodeContext<'_>) -> Option<StateMap>;
}
