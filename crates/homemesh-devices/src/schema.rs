//! Per-model property schema.
//!
//! Every property an accessory can set, read or receive is declared up front
//! with its kind. Descriptors are validated against the schema when they are
//! built, so a typo in a converter key fails at startup instead of silently
//! dropping values per message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a declared property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PropertyKind {
    /// Two-valued property such as on/off
    Binary { value_on: Value, value_off: Value },
    Numeric {
        min: Option<f64>,
        max: Option<f64>,
        unit: Option<String>,
    },
    Enum { values: Vec<String> },
    Text,
    /// Structured value such as a color with `x`/`y` fields
    Composite { fields: Vec<String> },
}

impl PropertyKind {
    /// Whether `value` is acceptable as a write for this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Binary {
                value_on,
                value_off,
            } => {
                if value == value_on || value == value_off || value.is_boolean() {
                    return true;
                }
                match value.as_str() {
                    Some(s) => {
                        s.eq_ignore_ascii_case("toggle")
                            || value_on.as_str().is_some_and(|on| on.eq_ignore_ascii_case(s))
                            || value_off.as_str().is_some_and(|off| off.eq_ignore_ascii_case(s))
                    }
                    None => false,
                }
            }
            Self::Numeric { min, max, .. } => match value.as_f64() {
                Some(n) => min.map_or(true, |m| n >= m) && max.map_or(true, |m| n <= m),
                None => false,
            },
            Self::Enum { values } => value
                .as_str()
                .is_some_and(|s| values.iter().any(|v| v == s)),
            Self::Text => value.is_string(),
            Self::Composite { fields } => value
                .as_object()
                .is_some_and(|obj| obj.keys().all(|k| fields.contains(k))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// A declared property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: PropertyKind,
    pub access: Access,
}

impl PropertySpec {
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            access: Access::ReadWrite,
        }
    }

    /// `ON`/`OFF` style switch.
    pub fn binary(name: impl Into<String>, value_on: Value, value_off: Value) -> Self {
        Self::new(
            name,
            PropertyKind::Binary {
                value_on,
                value_off,
            },
        )
    }

    pub fn numeric(name: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Self::new(
            name,
            PropertyKind::Numeric {
                min,
                max,
                unit: None,
            },
        )
    }

    pub fn enumeration<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            PropertyKind::Enum {
                values: values.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Text)
    }

    pub fn composite<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            PropertyKind::Composite {
                fields: fields.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        if let PropertyKind::Numeric { unit: u, .. } = &mut self.kind {
            *u = Some(unit.into());
        }
        self
    }

    pub fn read_only(mut self) -> Self {
        self.access = Access::ReadOnly;
        self
    }

    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }
}

/// Ordered set of declared properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    properties: Vec<PropertySpec>,
}

impl PropertySchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a property; returns `false` if the name is already declared.
    pub fn insert(&mut self, spec: PropertySpec) -> bool {
        if self.contains(&spec.name) {
            return false;
        }
        self.properties.push(spec);
        true
    }

    pub fn get(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PropertySpec> {
        self.properties.iter()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}
