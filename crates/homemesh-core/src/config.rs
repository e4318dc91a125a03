//! Bridge configuration.
//!
//! Values come from three layers: compiled defaults (`defaults`), a JSON
//! document, and `HOMEMESH_*` environment variables (`env_vars`).

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default values for bridge settings.
pub mod defaults {
    /// Window a read waits for its correlated reply.
    pub const CORRELATION_TIMEOUT_MS: u64 = 2000;
    /// Buffered state-change notifications per accessory.
    pub const STATE_CHANNEL_CAPACITY: usize = 64;
    /// Buffered events on the system-wide bus.
    pub const EVENT_BUS_CAPACITY: usize = 1000;
    /// Liveness probe interval (1 hour).
    pub const PING_INTERVAL_SECS: u64 = 60 * 60;
    /// Minimum spacing of upstream update checks per device (1 day).
    pub const OTA_CHECK_INTERVAL_MINS: u64 = 1440;
    /// Failed configure attempts before a device is left alone until it rejoins.
    pub const CONFIGURE_MAX_ATTEMPTS: u32 = 3;
}

/// Environment variable names and accessors.
pub mod env_vars {
    use super::defaults;

    pub const CORRELATION_TIMEOUT_MS: &str = "HOMEMESH_CORRELATION_TIMEOUT_MS";
    pub const STATE_CHANNEL_CAPACITY: &str = "HOMEMESH_STATE_CHANNEL_CAPACITY";
    pub const EVENT_BUS_CAPACITY: &str = "HOMEMESH_EVENT_BUS_CAPACITY";
    pub const PING_INTERVAL_SECS: &str = "HOMEMESH_PING_INTERVAL_SECS";
    pub const OTA_CHECK_INTERVAL_MINS: &str = "HOMEMESH_OTA_CHECK_INTERVAL_MINS";
    pub const OTA_DISABLE_AUTOMATIC_UPDATE_CHECK: &str =
        "HOMEMESH_OTA_DISABLE_AUTOMATIC_UPDATE_CHECK";
    pub const CONFIGURE_MAX_ATTEMPTS: &str = "HOMEMESH_CONFIGURE_MAX_ATTEMPTS";
    pub const PERMIT_JOIN: &str = "HOMEMESH_PERMIT_JOIN";
    pub const RETRIEVE_STATE: &str = "HOMEMESH_RETRIEVE_STATE";

    fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
        std::env::var(name)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default)
    }

    pub fn correlation_timeout_ms() -> u64 {
        parse_or(CORRELATION_TIMEOUT_MS, defaults::CORRELATION_TIMEOUT_MS)
    }

    pub fn state_channel_capacity() -> usize {
        parse_or(STATE_CHANNEL_CAPACITY, defaults::STATE_CHANNEL_CAPACITY)
    }

    pub fn event_bus_capacity() -> usize {
        parse_or(EVENT_BUS_CAPACITY, defaults::EVENT_BUS_CAPACITY)
    }

    pub fn ping_interval_secs() -> u64 {
        parse_or(PING_INTERVAL_SECS, defaults::PING_INTERVAL_SECS)
    }

    pub fn ota_check_interval_mins() -> u64 {
        parse_or(OTA_CHECK_INTERVAL_MINS, defaults::OTA_CHECK_INTERVAL_MINS)
    }

    pub fn ota_disable_automatic_update_check() -> bool {
        parse_or(OTA_DISABLE_AUTOMATIC_UPDATE_CHECK, false)
    }

    pub fn configure_max_attempts() -> u32 {
        parse_or(CONFIGURE_MAX_ATTEMPTS, defaults::CONFIGURE_MAX_ATTEMPTS)
    }

    pub fn permit_join() -> bool {
        parse_or(PERMIT_JOIN, false)
    }

    pub fn retrieve_state() -> bool {
        parse_or(RETRIEVE_STATE, false)
    }
}

/// Runtime configuration for the bridge core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub correlation_timeout_ms: u64,
    pub state_channel_capacity: usize,
    pub event_bus_capacity: usize,
    pub ping_interval_secs: u64,
    pub ota_check_interval_mins: u64,
    pub ota_disable_automatic_update_check: bool,
    pub configure_max_attempts: u32,
    /// Allow new devices to join once the stack is up.
    pub permit_join: bool,
    /// Re-read state after writes that declare a settle time.
    pub retrieve_state: bool,
    pub start_retry: RetryPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            correlation_timeout_ms: defaults::CORRELATION_TIMEOUT_MS,
            state_channel_capacity: defaults::STATE_CHANNEL_CAPACITY,
            event_bus_capacity: defaults::EVENT_BUS_CAPACITY,
            ping_interval_secs: defaults::PING_INTERVAL_SECS,
            ota_check_interval_mins: defaults::OTA_CHECK_INTERVAL_MINS,
            ota_disable_automatic_update_check: false,
            configure_max_attempts: defaults::CONFIGURE_MAX_ATTEMPTS,
            permit_join: false,
            retrieve_state: false,
            start_retry: RetryPolicy::stack_start(),
        }
    }
}

impl BridgeConfig {
    /// Build a configuration from `HOMEMESH_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            correlation_timeout_ms: env_vars::correlation_timeout_ms(),
            state_channel_capacity: env_vars::state_channel_capacity(),
            event_bus_capacity: env_vars::event_bus_capacity(),
            ping_interval_secs: env_vars::ping_interval_secs(),
            ota_check_interval_mins: env_vars::ota_check_interval_mins(),
            ota_disable_automatic_update_check: env_vars::ota_disable_automatic_update_check(),
            configure_max_attempts: env_vars::configure_max_attempts(),
            permit_join: env_vars::permit_join(),
            retrieve_state: env_vars::retrieve_state(),
            start_retry: RetryPolicy::stack_start(),
        }
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a component spin or never complete.
    pub fn validate(&self) -> Result<()> {
        if self.correlation_timeout_ms == 0 {
            return Err(Error::config("correlation_timeout_ms must be greater than 0"));
        }
        if self.state_channel_capacity == 0 {
            return Err(Error::config("state_channel_capacity must be greater than 0"));
        }
        if self.event_bus_capacity == 0 {
            return Err(Error::config("event_bus_capacity must be greater than 0"));
        }
        if self.ping_interval_secs == 0 {
            return Err(Error::config("ping_interval_secs must be greater than 0"));
        }
        if self.start_retry.max_attempts == 0 {
            return Err(Error::config("start_retry.max_attempts must be greater than 0"));
        }
        Ok(())
    }

    pub fn with_correlation_timeout(mut self, timeout: Duration) -> Self {
        self.correlation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval_secs = interval.as_secs();
        self
    }

    pub fn with_retrieve_state(mut self, enabled: bool) -> Self {
        self.retrieve_state = enabled;
        self
    }

    pub fn with_permit_join(mut self, permit: bool) -> Self {
        self.permit_join = permit;
        self
    }

    pub fn correlation_timeout(&self) -> Duration {
        Duration::from_millis(self.correlation_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn ota_check_interval(&self) -> Duration {
        Duration::from_secs(self.ota_check_interval_mins * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.correlation_timeout(), Duration::from_millis(2000));
        assert_eq!(config.ping_interval(), Duration::from_secs(3600));
        assert_eq!(config.ota_check_interval(), Duration::from_secs(86400));
        assert_eq!(config.configure_max_attempts, 3);
        assert_eq!(config.start_retry.max_attempts, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            BridgeConfig::from_json_str(r#"{"correlation_timeout_ms": 500, "permit_join": true}"#)
                .unwrap();
        assert_eq!(config.correlation_timeout_ms, 500);
        assert!(config.permit_join);
        assert_eq!(config.event_bus_capacity, defaults::EVENT_BUS_CAPACITY);
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        let result = BridgeConfig::from_json_str(r#"{"correlation_timeout_ms": "soon"}"#);
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let result = BridgeConfig::from_json_str(r#"{"correlation_timeout_ms": 0}"#);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builders() {
        let config = BridgeConfig::default()
            .with_correlation_timeout(Duration::from_millis(250))
            .with_retrieve_state(true);
        assert_eq!(config.correlation_timeout_ms, 250);
        assert!(config.retrieve_state);
    }
}
