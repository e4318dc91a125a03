//! Capability descriptors.
//!
//! A descriptor tells the bridge how to talk to one device model: its
//! property schema, encoders, decoders, named endpoints and optional
//! configure / event / firmware hooks. Descriptors are immutable once built.

use crate::converter::{FromConverter, ToConverter};
use crate::mesh::MeshStack;
use crate::model::Device;
use crate::schema::{PropertySchema, PropertySpec};
use async_trait::async_trait;
use homemesh_core::{MeshEvent, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Descriptor validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("Descriptor has no model identifier")]
    MissingModel,

    #[error("Property '{0}' is declared twice")]
    DuplicateProperty(String),

    #[error("Converter #{index} of '{model}' handles undeclared property '{key}'")]
    UnknownProperty {
        model: String,
        index: usize,
        key: String,
    },

    #[error("Converter #{index} of '{model}' declares no property keys")]
    EmptyKeys { model: String, index: usize },
}

impl From<DescriptorError> for homemesh_core::Error {
    fn from(e: DescriptorError) -> Self {
        homemesh_core::Error::Validation(e.to_string())
    }
}

/// Device-specific setup run once per descriptor version (bindings,
/// reporting intervals).
#[async_trait]
pub trait ConfigureHook: Send + Sync {
    async fn configure(
        &self,
        stack: &dyn MeshStack,
        device: &Device,
        coordinator_endpoint: u8,
    ) -> Result<()>;
}

/// Device-specific reaction to mesh events.
#[async_trait]
pub trait OnEventHook: Send + Sync {
    async fn on_event(&self, event: &MeshEvent, device: &Device, stack: &dyn MeshStack)
        -> Result<()>;
}

/// Upstream firmware lookup for a model.
#[async_trait]
pub trait OtaHook: Send + Sync {
    /// `request` is the payload of the device's next-image query.
    async fn is_update_available(&self, device: &Device, request: &Value) -> Result<bool>;
}

/// Capability descriptor for one device model.
pub struct CapabilityDescriptor {
    model: String,
    vendor: String,
    description: String,
    /// Model identifiers reported by devices of this kind
    model_ids: Vec<String>,
    schema: PropertySchema,
    to_converters: Vec<Arc<dyn ToConverter>>,
    from_converters: Vec<Arc<dyn FromConverter>>,
    endpoints: HashMap<String, u8>,
    configure_key: u32,
    configure: Option<Arc<dyn ConfigureHook>>,
    on_event: Option<Arc<dyn OnEventHook>>,
    ota: Option<Arc<dyn OtaHook>>,
}

impl CapabilityDescriptor {
    pub fn builder(model: impl Into<String>, vendor: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder::new(model, vendor)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn model_ids(&self) -> &[String] {
        &self.model_ids
    }

    pub fn schema(&self) -> &PropertySchema {
        &self.schema
    }

    pub fn to_converters(&self) -> &[Arc<dyn ToConverter>] {
        &self.to_converters
    }

    pub fn from_converters(&self) -> &[Arc<dyn FromConverter>] {
        &self.from_converters
    }

    /// First encoder that handles `key`, with its index in declaration order.
    pub fn find_to_converter(&self, key: &str) -> Option<(usize, &Arc<dyn ToConverter>)> {
        self.to_converters
            .iter()
            .enumerate()
            .find(|(_, c)| c.handles(key))
    }

    /// Named endpoint map, e.g. `left -> 1`.
    pub fn endpoints(&self) -> &HashMap<String, u8> {
        &self.endpoints
    }

    pub fn configure_key(&self) -> u32 {
        self.configure_key
    }

    pub fn configure_hook(&self) -> Option<&Arc<dyn ConfigureHook>> {
        self.configure.as_ref()
    }

    pub fn on_event_hook(&self) -> Option<&Arc<dyn OnEventHook>> {
        self.on_event.as_ref()
    }

    pub fn ota_hook(&self) -> Option<&Arc<dyn OtaHook>> {
        self.ota.as_ref()
    }

    pub fn supports_ota(&self) -> bool {
        self.ota.is_some()
    }
}

impl fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("model", &self.model)
            .field("vendor", &self.vendor)
            .field("model_ids", &self.model_ids)
            .field("properties", &self.schema.len())
            .field("to_converters", &self.to_converters.len())
            .field("from_converters", &self.from_converters.len())
            .field("endpoints", &self.endpoints)
            .field("configure_key", &self.configure_key)
            .field("configure", &self.configure.is_some())
            .field("ota", &self.ota.is_some())
            .finish()
    }
}

/// Builder that validates converters against the schema.
pub struct DescriptorBuilder {
    model: String,
    vendor: String,
    description: Option<String>,
    model_ids: Vec<String>,
    properties: Vec<PropertySpec>,
    to_converters: Vec<Arc<dyn ToConverter>>,
    from_converters: Vec<Arc<dyn FromConverter>>,
    endpoints: HashMap<String, u8>,
    configure_key: u32,
    configure: Option<Arc<dyn ConfigureHook>>,
    on_event: Option<Arc<dyn OnEventHook>>,
    ota: Option<Arc<dyn OtaHook>>,
}

impl DescriptorBuilder {
    pub fn new(model: impl Into<String>, vendor: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            vendor: vendor.into(),
            description: None,
            model_ids: Vec::new(),
            properties: Vec::new(),
            to_converters: Vec::new(),
            from_converters: Vec::new(),
            endpoints: HashMap::new(),
            configure_key: 0,
            configure: None,
            on_event: None,
            ota: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Model identifier a device reports; defaults to the model name.
    pub fn model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_ids.push(model_id.into());
        self
    }

    pub fn property(mut self, spec: PropertySpec) -> Self {
        self.properties.push(spec);
        self
    }

    pub fn to_converter(mut self, converter: impl ToConverter + 'static) -> Self {
        self.to_converters.push(Arc::new(converter));
        self
    }

    pub fn from_converter(mut self, converter: impl FromConverter + 'static) -> Self {
        self.from_converters.push(Arc::new(converter));
        self
    }

    pub fn endpoint(mut self, name: impl Into<String>, id: u8) -> Self {
        self.endpoints.insert(name.into(), id);
        self
    }

    /// Configure hook and the version tag persisted after it succeeds.
    pub fn configure(mut self, key: u32, hook: impl ConfigureHook + 'static) -> Self {
        self.configure_key = key;
        self.configure = Some(Arc::new(hook));
        self
    }

    pub fn on_event(mut self, hook: impl OnEventHook + 'static) -> Self {
        self.on_event = Some(Arc::new(hook));
        self
    }

    pub fn ota(mut self, hook: impl OtaHook + 'static) -> Self {
        self.ota = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> std::result::Result<CapabilityDescriptor, DescriptorError> {
        if self.model.is_empty() {
            return Err(DescriptorError::MissingModel);
        }

        let mut schema = PropertySchema::new();
        for spec in self.properties {
            let name = spec.name.clone();
            if !schema.insert(spec) {
                return Err(DescriptorError::DuplicateProperty(name));
            }
        }

        for (index, converter) in self.to_converters.iter().enumerate() {
            if converter.keys().is_empty() {
                return Err(DescriptorError::EmptyKeys {
                    model: self.model.clone(),
                    index,
                });
            }
            check_keys(&schema, &self.model, index, converter.keys())?;
        }

        for (index, converter) in self.from_converters.iter().enumerate() {
            check_keys(&schema, &self.model, index, converter.keys())?;
        }

        let model_ids = if self.model_ids.is_empty() {
            vec![self.model.clone()]
        } else {
            self.model_ids
        };

        Ok(CapabilityDescriptor {
            description: self.description.unwrap_or_else(|| self.model.clone()),
            model: self.model,
            vendor: self.vendor,
            model_ids,
            schema,
            to_converters: self.to_converters,
            from_converters: self.from_converters,
            endpoints: self.endpoints,
            configure_key: self.configure_key,
            configure: self.configure,
            on_event: self.on_event,
            ota: self.ota,
        })
    }
}

fn check_keys(
    schema: &PropertySchema,
    model: &str,
    index: usize,
    keys: &[String],
) -> std::result::Result<(), DescriptorError> {
    match keys.iter().find(|k| !schema.contains(k)) {
        Some(key) => Err(DescriptorError::UnknownProperty {
            model: model.to_string(),
            index,
            key: key.clone(),
        }),
        None => Ok(()),
    }
}
