//! Mesh events that flow through the event bus.

use crate::message::MeshMessage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Progress of the stack's discovery phase for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterviewStatus {
    Started,
    Successful,
    Failed,
}

impl fmt::Display for InterviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Successful => write!(f, "successful"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// System-wide mesh event.
///
/// Events carry device addresses rather than device handles; subscribers
/// look devices up through the mesh stack when they need them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MeshEvent {
    /// The mesh stack is up and the network is formed
    Started,
    /// The bridge is shutting down
    Stop,
    /// Inbound message from a device
    Message { message: MeshMessage },
    /// A supported device finished its interview after joining
    DeviceJoined { address: String },
    DeviceInterview {
        address: String,
        status: InterviewStatus,
    },
    DeviceAnnounce { address: String },
    DeviceLeave { address: String },
    /// The radio adapter went away
    AdapterDisconnected,
}

impl MeshEvent {
    /// Get the event type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Started => "Started",
            Self::Stop => "Stop",
            Self::Message { .. } => "Message",
            Self::DeviceJoined { .. } => "DeviceJoined",
            Self::DeviceInterview { .. } => "DeviceInterview",
            Self::DeviceAnnounce { .. } => "DeviceAnnounce",
            Self::DeviceLeave { .. } => "DeviceLeave",
            Self::AdapterDisconnected => "AdapterDisconnected",
        }
    }

    /// Address of the device this event concerns, if any.
    pub fn device_address(&self) -> Option<&str> {
        match self {
            Self::Message { message } => Some(&message.address),
            Self::DeviceJoined { address }
            | Self::DeviceInterview { address, .. }
            | Self::DeviceAnnounce { address }
            | Self::DeviceLeave { address } => Some(address),
            Self::Started | Self::Stop | Self::AdapterDisconnected => None,
        }
    }
}

/// Metadata attached to every published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event ID
    pub event_id: String,
    /// Optional correlation ID (for grouping related events)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Component that published the event
    pub source: String,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
}

impl EventMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            correlation_id: None,
            source: source.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}
