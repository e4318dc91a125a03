//! Outbound property ordering.
//!
//! Some bulbs drop color writes received while they are off. When the
//! light ends up off, color goes out first, then power, then brightness.
//! When it ends up on, brightness goes out first, then power, then color.

use homemesh_devices::StateMap;
use serde_json::Value;

const BRIGHTNESS_KEYS: &[&str] = &["brightness", "brightness_percent"];

const COLOR_KEYS: &[&str] = &[
    "color",
    "color_temp",
    "color_xy",
    "color_hs",
    "color_temp_percent",
    "hue",
    "saturation",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Group {
    First,
    Power,
    Second,
    Rest,
}

fn is_off(value: &Value) -> bool {
    match value {
        Value::String(s) => s.eq_ignore_ascii_case("off"),
        Value::Bool(b) => !b,
        _ => false,
    }
}

/// Whether the light is off once `properties` has been applied.
///
/// Falls back to the cached state, then to on.
pub fn resulting_off(properties: &StateMap, state: &StateMap) -> bool {
    properties
        .get("state")
        .or_else(|| state.get("state"))
        .map(is_off)
        .unwrap_or(false)
}

fn group(key: &str, off: bool) -> Group {
    let brightness = BRIGHTNESS_KEYS.contains(&key);
    let color = COLOR_KEYS.contains(&key);
    match (key, off) {
        ("state", _) => Group::Power,
        _ if color && off => Group::First,
        _ if brightness && !off => Group::First,
        _ if color || brightness => Group::Second,
        _ => Group::Rest,
    }
}

/// Order properties for sending. Keys within a group keep map order.
pub fn order_properties(properties: &StateMap, state: &StateMap) -> Vec<(String, Value)> {
    let off = resulting_off(properties, state);
    let mut entries: Vec<(String, Value)> = properties
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    entries.sort_by_key(|(key, _)| group(base_key(key), off));
    entries
}

/// Group membership ignores an endpoint suffix, e.g. `state_left`.
fn base_key(key: &str) -> &str {
    crate::target::split_endpoint(key)
        .map(|(base, _)| base)
        .unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> StateMap {
        value.as_object().cloned().unwrap_or_default()
    }

    fn keys(entries: &[(String, Value)]) -> Vec<&str> {
        entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    #[test]
    fn test_turning_off() {
        let props = map(json!({"brightness": 50, "state": "OFF", "color_temp": 300, "effect": "blink"}));
        let ordered = order_properties(&props, &StateMap::new());
        assert_eq!(keys(&ordered), ["color_temp", "state", "brightness", "effect"]);
    }

    #[test]
    fn test_turning_on() {
        let props = map(json!({"color": {"x": 0.3, "y": 0.3}, "state": "ON", "brightness": 50}));
        let ordered = order_properties(&props, &StateMap::new());
        assert_eq!(keys(&ordered), ["brightness", "state", "color"]);
    }

    #[test]
    fn test_cached_state_decides() {
        let props = map(json!({"brightness": 10, "hue": 120}));
        let cached = map(json!({"state": "OFF"}));
        assert_eq!(keys(&order_properties(&props, &cached)), ["hue", "brightness"]);

        // Unknown state counts as on
        assert_eq!(
            keys(&order_properties(&props, &StateMap::new())),
            ["brightness", "hue"]
        );
    }

    #[test]
    fn test_suffixed_keys_grouped() {
        let props = map(json!({"state_left": "OFF", "brightness_left": 3}));
        let ordered = order_properties(&props, &map(json!({"state": "OFF"})));
        assert_eq!(keys(&ordered), ["state_left", "brightness_left"]);
    }
}
