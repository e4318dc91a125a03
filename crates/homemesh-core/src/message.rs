//! Inbound mesh message payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known cluster names.
pub mod clusters {
    pub const ON_OFF: &str = "genOnOff";
    pub const LEVEL_CONTROL: &str = "genLevelCtrl";
    pub const COLOR_CONTROL: &str = "lightingColorCtrl";
    pub const BASIC: &str = "genBasic";
    pub const OTA: &str = "genOta";
    pub const TIME: &str = "genTime";
}

/// Well-known message types.
pub mod message_types {
    pub const ATTRIBUTE_REPORT: &str = "attributeReport";
    pub const READ_RESPONSE: &str = "readResponse";
    pub const QUERY_NEXT_IMAGE_REQUEST: &str = "commandQueryNextImageRequest";
}

/// A decoded-at-the-frame-level message received from a device.
///
/// `data` is the cluster payload as delivered by the stack; converters turn
/// it into named properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshMessage {
    /// IEEE address of the sending device
    pub address: String,
    /// Source endpoint ID
    pub endpoint: u8,
    pub cluster: String,
    pub message_type: String,
    pub data: Value,
    /// Transaction sequence number from the frame header, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_sequence: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_quality: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<u16>,
}

impl MeshMessage {
    pub fn new(
        address: impl Into<String>,
        endpoint: u8,
        cluster: impl Into<String>,
        message_type: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            address: address.into(),
            endpoint,
            cluster: cluster.into(),
            message_type: message_type.into(),
            data,
            transaction_sequence: None,
            link_quality: None,
            group_id: None,
        }
    }

    pub fn with_transaction_sequence(mut self, tsn: u8) -> Self {
        self.transaction_sequence = Some(tsn);
        self
    }

    pub fn with_link_quality(mut self, lqi: u8) -> Self {
        self.link_quality = Some(lqi);
        self
    }

    /// Housekeeping traffic that never carries accessory state.
    pub fn is_housekeeping(&self) -> bool {
        self.cluster == clusters::OTA || self.cluster == clusters::TIME
    }
}
