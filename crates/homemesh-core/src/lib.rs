//! Core types for the HomeMesh bridge.
//!
//! This crate holds the pieces every other crate leans on:
//! - `error`: unified error type
//! - `config`: bridge configuration, defaults and environment overrides
//! - `retry`: exponential backoff policy
//! - `event` / `eventbus`: mesh events and the system-wide event bus
//! - `message`: inbound mesh message payload
//! - `logging`: tracing subscriber setup

pub mod config;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod logging;
pub mod message;
pub mod retry;

pub use config::BridgeConfig;
pub use error::{Error, Result};
pub use event::{EventMetadata, InterviewStatus, MeshEvent};
pub use eventbus::{EventBus, EventBusReceiver, FilteredReceiver, SharedEventBus};
pub use message::MeshMessage;
pub use retry::RetryPolicy;

/// Re-exports for the common case.
pub mod prelude {
    pub use crate::config::BridgeConfig;
    pub use crate::error::{Error, Result};
    pub use crate::event::{EventMetadata, InterviewStatus, MeshEvent};
    pub use crate::eventbus::{EventBus, SharedEventBus};
    pub use crate::message::MeshMessage;
}
