//! Generic lighting converters.
//!
//! Encoders and decoders for the standard on/off, level and color
//! temperature clusters. Vendor-specific converters live with their
//! descriptors outside this crate.

use crate::converter::{
    DecodeContext, FromConverter, GetContext, SetContext, SetResult, StateMap, ToConverter,
};
use async_trait::async_trait;
use homemesh_core::message::{clusters, message_types};
use homemesh_core::{Error, MeshMessage, Result};
use serde_json::{json, Value};
use std::time::Duration;

/// Property key as seen by the accessory, e.g. `state_left`.
pub fn postfix_key(key: &str, endpoint_name: Option<&str>) -> String {
    match endpoint_name {
        Some(name) if !name.is_empty() && name != "default" => format!("{}_{}", key, name),
        _ => key.to_string(),
    }
}

fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn report_types() -> Vec<String> {
    keys(&[message_types::ATTRIBUTE_REPORT, message_types::READ_RESPONSE])
}

/// `ON`, `OFF` or `TOGGLE` from a state value.
fn on_off_command(value: &Value) -> Result<&'static str> {
    match value {
        Value::Bool(true) => Ok("on"),
        Value::Bool(false) => Ok("off"),
        Value::String(s) if s.eq_ignore_ascii_case("on") => Ok("on"),
        Value::String(s) if s.eq_ignore_ascii_case("off") => Ok("off"),
        Value::String(s) if s.eq_ignore_ascii_case("toggle") => Ok("toggle"),
        other => Err(Error::converter(format!("invalid state value {}", other))),
    }
}

fn level_value(value: &Value) -> Result<u8> {
    value
        .as_f64()
        .map(|n| n.round().clamp(0.0, 254.0) as u8)
        .ok_or_else(|| Error::converter(format!("invalid brightness value {}", value)))
}

fn state_after(command: &str, current: Option<&Value>) -> &'static str {
    match command {
        "on" => "ON",
        "off" => "OFF",
        _ => match current.and_then(Value::as_str) {
            Some(s) if s.eq_ignore_ascii_case("on") => "OFF",
            _ => "ON",
        },
    }
}

/// On/off switch encoder.
pub struct OnOff {
    keys: Vec<String>,
}

impl OnOff {
    pub fn new() -> Self {
        Self {
            keys: keys(&["state"]),
        }
    }
}

impl Default for OnOff {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToConverter for OnOff {
    fn keys(&self) -> &[String] {
        &self.keys
    }

    async fn convert_set(&self, ctx: &SetContext<'_>) -> Result<Option<SetResult>> {
        let command = on_off_command(ctx.value)?;
        ctx.stack
            .command(&ctx.device.address, ctx.endpoint, clusters::ON_OFF, command, json!({}))
            .await?;

        let key = postfix_key("state", ctx.endpoint_name);
        let mut state = StateMap::new();
        state.insert(key.clone(), json!(state_after(command, ctx.state.get(&key))));
        Ok(Some(SetResult::with_state(state)))
    }

    async fn convert_get(&self, ctx: &GetContext<'_>) -> Result<()> {
        ctx.stack
            .read(&ctx.device.address, ctx.endpoint, clusters::ON_OFF, &keys(&["onOff"]))
            .await?;
        Ok(())
    }
}

/// Level control encoder.
pub struct Brightness {
    keys: Vec<String>,
    read_after_write: Option<Duration>,
}

impl Brightness {
    pub fn new() -> Self {
        Self {
            keys: keys(&["brightness"]),
            read_after_write: None,
        }
    }

    /// Ask for a read-back this long after each write.
    pub fn with_read_after_write(mut self, delay: Duration) -> Self {
        self.read_after_write = Some(delay);
        self
    }
}

impl Default for Brightness {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToConverter for Brightness {
    fn keys(&self) -> &[String] {
        &self.keys
    }

    async fn convert_set(&self, ctx: &SetContext<'_>) -> Result<Option<SetResult>> {
        let level = level_value(ctx.value)?;
        ctx.stack
            .command(
                &ctx.device.address,
                ctx.endpoint,
                clusters::LEVEL_CONTROL,
                "moveToLevel",
                json!({"level": level, "transtime": 0}),
            )
            .await?;

        let mut state = StateMap::new();
        state.insert(postfix_key("brightness", ctx.endpoint_name), json!(level));
        let mut result = SetResult::with_state(state);
        result.read_after_write = self.read_after_write;
        Ok(Some(result))
    }

    async fn convert_get(&self, ctx: &GetContext<'_>) -> Result<()> {
        ctx.stack
            .read(
                &ctx.device.address,
                ctx.endpoint,
                clusters::LEVEL_CONTROL,
                &keys(&["currentLevel"]),
            )
            .await?;
        Ok(())
    }
}

/// Combined on/off and level encoder.
///
/// Handles `state` and `brightness` in one command, so it must run once per
/// write even when both keys are present.
pub struct OnOffBrightness {
    keys: Vec<String>,
}

impl OnOffBrightness {
    pub fn new() -> Self {
        Self {
            keys: keys(&["state", "brightness"]),
        }
    }
}

impl Default for OnOffBrightness {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToConverter for OnOffBrightness {
    fn keys(&self) -> &[String] {
        &self.keys
    }

    async fn convert_set(&self, ctx: &SetContext<'_>) -> Result<Option<SetResult>> {
        let state_key = postfix_key("state", ctx.endpoint_name);
        let brightness_key = postfix_key("brightness", ctx.endpoint_name);
        let state_value = ctx.message.get(&state_key);
        let brightness = ctx.message.get(&brightness_key);
        let address = &ctx.device.address;

        let turning_off = match state_value {
            Some(value) => on_off_command(value)? == "off",
            None => false,
        };

        let mut state = StateMap::new();
        match brightness {
            Some(value) if !turning_off => {
                let level = level_value(value)?;
                ctx.stack
                    .command(
                        address,
                        ctx.endpoint,
                        clusters::LEVEL_CONTROL,
                        "moveToLevelWithOnOff",
                        json!({"level": level, "transtime": 0}),
                    )
                    .await?;
                state.insert(brightness_key, json!(level));
                state.insert(state_key, json!(if level > 0 { "ON" } else { "OFF" }));
            }
            _ => {
                let value = state_value.unwrap_or(ctx.value);
                let command = on_off_command(value)?;
                ctx.stack
                    .command(address, ctx.endpoint, clusters::ON_OFF, command, json!({}))
                    .await?;
                let current = ctx.state.get(&state_key);
                let after = state_after(command, current);
                state.insert(state_key, json!(after));
            }
        }

        Ok(Some(SetResult::with_state(state)))
    }

    async fn convert_get(&self, ctx: &GetContext<'_>) -> Result<()> {
        let (cluster, attribute) = if ctx.key == "brightness" {
            (clusters::LEVEL_CONTROL, "currentLevel")
        } else {
            (clusters::ON_OFF, "onOff")
        };
        ctx.stack
            .read(&ctx.device.address, ctx.endpoint, cluster, &keys(&[attribute]))
            .await?;
        Ok(())
    }
}

/// Color temperature encoder (mireds).
pub struct ColorTemp {
    keys: Vec<String>,
}

impl ColorTemp {
    pub fn new() -> Self {
        Self {
            keys: keys(&["color_temp"]),
        }
    }
}

impl Default for ColorTemp {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToConverter for ColorTemp {
    fn keys(&self) -> &[String] {
        &self.keys
    }

    async fn convert_set(&self, ctx: &SetContext<'_>) -> Result<Option<SetResult>> {
        let mireds = ctx
            .value
            .as_u64()
            .ok_or_else(|| Error::converter(format!("invalid color_temp value {}", ctx.value)))?;
        ctx.stack
            .command(
                &ctx.device.address,
                ctx.endpoint,
                clusters::COLOR_CONTROL,
                "moveToColorTemp",
                json!({"colortemp": mireds, "transtime": 0}),
            )
            .await?;

        let mut state = StateMap::new();
        state.insert(postfix_key("color_temp", ctx.endpoint_name), json!(mireds));
        Ok(Some(SetResult::with_state(state)))
    }

    async fn convert_get(&self, ctx: &GetContext<'_>) -> Result<()> {
        ctx.stack
            .read(
                &ctx.device.address,
                ctx.endpoint,
                clusters::COLOR_CONTROL,
                &keys(&["colorTemperature"]),
            )
            .await?;
        Ok(())
    }
}

/// Decodes `onOff` reports into `state`.
pub struct OnOffDecoder {
    types: Vec<String>,
    keys: Vec<String>,
}

impl OnOffDecoder {
    pub fn new() -> Self {
        Self {
            types: report_types(),
            keys: keys(&["state"]),
        }
    }
}

impl Default for OnOffDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FromConverter for OnOffDecoder {
    fn cluster(&self) -> &str {
        clusters::ON_OFF
    }

    fn message_types(&self) -> &[String] {
        &self.types
    }

    fn keys(&self) -> &[String] {
        &self.keys
    }

    fn convert(&self, message: &MeshMessage, ctx: &DecodeContext<'_>) -> Option<StateMap> {
        let on = message.data.get("onOff")?.as_u64()?;
        let mut state = StateMap::new();
        state.insert(
            postfix_key("state", ctx.endpoint_name),
            json!(if on == 1 { "ON" } else { "OFF" }),
        );
        Some(state)
    }
}

/// Decodes `currentLevel` reports into `brightness`.
pub struct LevelDecoder {
    types: Vec<String>,
    keys: Vec<String>,
}

impl LevelDecoder {
    pub fn new() -> Self {
        Self {
            types: report_types(),
            keys: keys(&["brightness"]),
        }
    }
}

impl Default for LevelDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FromConverter for LevelDecoder {
    fn cluster(&self) -> &str {
        clusters::LEVEL_CONTROL
    }

    fn message_types(&self) -> &[String] {
        &self.types
    }

    fn keys(&self) -> &[String] {
        &self.keys
    }

    fn convert(&self, message: &MeshMessage, ctx: &DecodeContext<'_>) -> Option<StateMap> {
        let level = message.data.get("currentLevel")?.as_u64()?;
        let mut state = StateMap::new();
        state.insert(postfix_key("brightness", ctx.endpoint_name), json!(level));
        Some(state)
    }
}

/// Decodes `colorTemperature` reports into `color_temp`.
pub struct ColorTempDecoder {
    types: Vec<String>,
    keys: Vec<String>,
}

impl ColorTempDecoder {
    pub fn new() -> Self {
        Self {
            types: report_types(),
            keys: keys(&["color_temp"]),
        }
    }
}

impl Default for ColorTempDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FromConverter for ColorTempDecoder {
    fn cluster(&self) -> &str {
        clusters::COLOR_CONTROL
    }

    fn message_types(&self) -> &[String] {
        &self.types
    }

    fn keys(&self) -> &[String] {
        &self.keys
    }

    fn convert(&self, message: &MeshMessage, ctx: &DecodeContext<'_>) -> Option<StateMap> {
        let mireds = message.data.get("colorTemperature")?.as_u64()?;
        let mut state = StateMap::new();
        state.insert(postfix_key("color_temp", ctx.endpoint_name), json!(mireds));
        Some(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshStack;
    use crate::mock::{MockCall, MockMeshStack};
    use crate::model::{Device, DeviceRole, Endpoint};

    fn bulb() -> Device {
        Device::new("0x01", DeviceRole::Router).with_endpoint(Endpoint::new(1))
    }

    #[test]
    fn test_postfix_key() {
        assert_eq!(postfix_key("state", None), "state");
        assert_eq!(postfix_key("state", Some("default")), "state");
        assert_eq!(postfix_key("state", Some("left")), "state_left");
    }

    #[tokio::test]
    async fn test_on_off_brightness_single_command() {
        let stack = MockMeshStack::new().with_device(bulb());
        stack.start().await.unwrap();
        let device = bulb();

        let mut message = StateMap::new();
        message.insert("state".into(), json!("ON"));
        message.insert("brightness".into(), json!(120));
        let empty = StateMap::new();

        let ctx = SetContext {
            stack: &stack,
            device: &device,
            endpoint: 1,
            endpoint_name: None,
            key: "state",
            value: &message["state"],
            message: &message,
            state: &empty,
            options: &empty,
        };
        let result = OnOffBrightness::new().convert_set(&ctx).await.unwrap().unwrap();

        assert_eq!(result.state.get("brightness"), Some(&json!(120)));
        assert_eq!(result.state.get("state"), Some(&json!("ON")));
        let calls = stack.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(
            &calls[0],
            MockCall::Command { command, .. } if command == "moveToLevelWithOnOff"
        ));
    }

    #[test]
    fn test_on_off_decoder_uses_endpoint_name() {
        let device = bulb();
        let empty = StateMap::new();
        let ctx = DecodeContext {
            device: &device,
            endpoint_name: Some("right"),
            state: &empty,
            options: &empty,
        };
        let message = MeshMessage::new("0x01", 2, "genOnOff", "attributeReport", json!({"onOff": 0}));
        let decoded = OnOffDecoder::new().convert(&message, &ctx).unwrap();
        assert_eq!(decoded.get("state_right"), Some(&json!("OFF")));
    }

    #[tokio::test]
    async fn test_on_off_brightness_uses_suffixed_keys() {
        let stack = MockMeshStack::new().with_device(bulb());
        stack.start().await.unwrap();
        let device = bulb();

        let mut message = StateMap::new();
        message.insert("state_left".into(), json!("ON"));
        message.insert("brightness_left".into(), json!(80));
        let empty = StateMap::new();

        let ctx = SetContext {
            stack: &stack,
            device: &device,
            endpoint: 1,
            endpoint_name: Some("left"),
            key: "state",
            value: &message["state_left"],
            message: &message,
            state: &empty,
            options: &empty,
        };
        let result = OnOffBrightness::new().convert_set(&ctx).await.unwrap().unwrap();

        assert_eq!(result.state.get("brightness_left"), Some(&json!(80)));
        assert_eq!(result.state.get("state_left"), Some(&json!("ON")));
        assert!(!result.state.contains_key("state"));
        assert!(matches!(
            &stack.calls()[0],
            MockCall::Command { command, .. } if command == "moveToLevelWithOnOff"
        ));
    }

    #[test]
    fn test_color_temp_decoder_uses_endpoint_name() {
        let device = bulb();
        let empty = StateMap::new();
        let ctx = DecodeContext {
            device: &device,
            endpoint_name: Some("white"),
            state: &empty,
            options: &empty,
        };
        let message = MeshMessage::new(
            "0x01",
            1,
            "lightingColorCtrl",
            "attributeReport",
            json!({"colorTemperature": 300}),
        );
        let decoded = ColorTempDecoder::new().convert(&message, &ctx).unwrap();
        assert_eq!(decoded.get("color_temp_white"), Some(&json!(300)));
    }

    #[test]
    fn test_invalid_state_value() {
        assert!(on_off_command(&json!("dim")).is_err());
        assert_eq!(on_off_command(&json!(false)).unwrap(), "off");
    }
}
