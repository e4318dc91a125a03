//! Mesh device data model.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Network role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceRole {
    Coordinator,
    Router,
    EndDevice,
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coordinator => write!(f, "Coordinator"),
            Self::Router => write!(f, "Router"),
            Self::EndDevice => write!(f, "EndDevice"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerSource {
    Mains,
    Battery,
    Dc,
    Unknown,
}

/// Addressable sub-unit of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: u8,
    pub input_clusters: Vec<String>,
    pub output_clusters: Vec<String>,
}

impl Endpoint {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            input_clusters: Vec::new(),
            output_clusters: Vec::new(),
        }
    }

    pub fn with_input_clusters<I, S>(mut self, clusters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_clusters = clusters.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_output_clusters<I, S>(mut self, clusters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_clusters = clusters.into_iter().map(Into::into).collect();
        self
    }

    pub fn supports_input_cluster(&self, cluster: &str) -> bool {
        self.input_clusters.iter().any(|c| c == cluster)
    }

    pub fn supports_output_cluster(&self, cluster: &str) -> bool {
        self.output_clusters.iter().any(|c| c == cluster)
    }
}

/// A node on the mesh network, as known to the stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// IEEE address, unique and stable
    pub address: String,
    pub network_address: u16,
    pub model_id: Option<String>,
    pub manufacturer: Option<String>,
    pub role: DeviceRole,
    pub power_source: PowerSource,
    pub endpoints: Vec<Endpoint>,
    /// True while the stack is still discovering endpoints and clusters
    pub interviewing: bool,
}

impl Device {
    pub fn new(address: impl Into<String>, role: DeviceRole) -> Self {
        Self {
            address: address.into(),
            network_address: 0,
            model_id: None,
            manufacturer: None,
            role,
            power_source: PowerSource::Unknown,
            endpoints: Vec::new(),
            interviewing: false,
        }
    }

    pub fn coordinator(address: impl Into<String>) -> Self {
        Self::new(address, DeviceRole::Coordinator)
            .with_power_source(PowerSource::Mains)
            .with_endpoint(Endpoint::new(1))
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    pub fn with_power_source(mut self, power_source: PowerSource) -> Self {
        self.power_source = power_source;
        self
    }

    pub fn with_network_address(mut self, network_address: u16) -> Self {
        self.network_address = network_address;
        self
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn with_interviewing(mut self, interviewing: bool) -> Self {
        self.interviewing = interviewing;
        self
    }

    pub fn endpoint(&self, id: u8) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    pub fn first_endpoint(&self) -> Option<&Endpoint> {
        self.endpoints.first()
    }

    pub fn is_coordinator(&self) -> bool {
        self.role == DeviceRole::Coordinator
    }

    /// Battery-powered end devices sleep between polls.
    pub fn is_sleepy(&self) -> bool {
        self.role == DeviceRole::EndDevice && self.power_source == PowerSource::Battery
    }

    /// Model identifier when known, address otherwise.
    pub fn name(&self) -> &str {
        self.model_id.as_deref().unwrap_or(&self.address)
    }
}
