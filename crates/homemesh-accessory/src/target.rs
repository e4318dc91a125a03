//! Property to endpoint targeting.

use homemesh_devices::ResolvedEntity;
use once_cell::sync::Lazy;
use regex::Regex;

/// Endpoint names a property key may carry as a suffix, e.g. `state_left`.
pub const ENDPOINT_NAMES: &[&str] = &[
    "left", "right", "center", "bottom_left", "bottom_right", "default", "top_left",
    "top_right", "white", "rgb", "cct", "system", "top", "bottom", "center_left",
    "center_right", "ep1", "ep2", "row_1", "row_2", "row_3", "row_4", "relay", "usb",
    "l1", "l2", "l3", "l4", "l5", "l6", "l7", "l8", "l9", "l10", "l11", "l12", "l13",
    "l14", "l15", "l16", "button_1", "button_2", "button_3", "button_4", "button_5",
    "button_6", "button_7", "button_8", "button_9", "button_10", "button_11", "button_12",
    "button_13", "button_14", "button_15", "button_16", "button_17", "button_18",
    "button_19", "button_20", "button_light", "button_fan_high", "button_fan_med",
    "button_fan_low", "heat", "cool", "water", "meter", "wifi",
];

static PROPERTY_ENDPOINT: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(&format!(r"^(.*)_({}|\d+)$", ENDPOINT_NAMES.join("|"))).ok()
});

/// Split `state_left` into `("state", "left")`. Keys without a known
/// suffix give `None`.
pub fn split_endpoint(key: &str) -> Option<(&str, &str)> {
    let captures = PROPERTY_ENDPOINT.as_ref()?.captures(key)?;
    let base = captures.get(1)?.as_str();
    let name = captures.get(2)?.as_str();
    Some((base, name))
}

/// Where one property goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    /// Key with the endpoint suffix removed
    pub key: String,
    pub endpoint: u8,
    /// The suffix, when the key carried one
    pub endpoint_name: Option<String>,
}

/// Resolve the endpoint a property is sent to.
///
/// A suffix overrides the default endpoint. Returns `None` when the suffix
/// names an endpoint the device does not have.
pub fn publish_target(entity: &ResolvedEntity, default_endpoint: u8, key: &str) -> Option<PublishTarget> {
    match split_endpoint(key) {
        Some((base, name)) => match entity.endpoint(Some(name)) {
            Some(endpoint) => Some(PublishTarget {
                key: base.to_string(),
                endpoint: endpoint.id,
                endpoint_name: Some(name.to_string()),
            }),
            None => {
                tracing::error!("Device '{}' has no endpoint '{}'", entity.name(), name);
                None
            }
        },
        None => Some(PublishTarget {
            key: key.to_string(),
            endpoint: default_endpoint,
            endpoint_name: None,
        }),
    }
}
