//! Mesh radio stack interface.
//!
//! The radio stack itself (joining, routing, security, frame encoding) is
//! supplied from outside. This module defines what the bridge needs from it.

use crate::model::Device;
use async_trait::async_trait;
use futures::Stream;
use homemesh_core::{InterviewStatus, MeshMessage};
use serde_json::Value;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};

/// Result type for stack operations.
pub type MeshResult<T> = Result<T, MeshError>;

/// Error type for stack operations.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("Device '{0}' is unreachable")]
    Unreachable(String),

    #[error("Device '{0}' not found")]
    DeviceNotFound(String),

    /// The device answered with a non-success status
    #[error("Command rejected with status 0x{status:02x}")]
    Nack { status: u8 },

    #[error("Operation timeout after {0}ms")]
    Timeout(u64),

    #[error("Mesh stack is stopped")]
    Stopped,

    #[error("Mesh stack error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<MeshError> for homemesh_core::Error {
    fn from(e: MeshError) -> Self {
        match e {
            MeshError::Timeout(_) => homemesh_core::Error::Timeout(e.to_string()),
            MeshError::DeviceNotFound(_) => homemesh_core::Error::NotFound(e.to_string()),
            other => homemesh_core::Error::Mesh(other.to_string()),
        }
    }
}

/// Raw event emitted by the stack.
#[derive(Debug, Clone, PartialEq)]
pub enum StackEvent {
    Message(MeshMessage),
    DeviceJoined { address: String },
    DeviceInterview {
        address: String,
        status: InterviewStatus,
    },
    DeviceAnnounce { address: String },
    DeviceLeave { address: String },
    AdapterDisconnected,
}

/// Stream of raw stack events.
pub type StackEventStream = Pin<Box<dyn Stream<Item = StackEvent> + Send>>;

/// The mesh radio stack.
///
/// Devices are looked up by address on demand; the stack never holds
/// references to accessories.
#[async_trait]
pub trait MeshStack: Send + Sync {
    async fn start(&self) -> MeshResult<()>;

    async fn stop(&self) -> MeshResult<()>;

    fn is_running(&self) -> bool;

    /// Subscribe to raw stack events.
    fn subscribe(&self) -> StackEventStream;

    /// All devices in the network database, coordinator included.
    fn devices(&self) -> Vec<Device>;

    fn device(&self, address: &str) -> Option<Device>;

    /// All devices except the coordinator.
    fn clients(&self) -> Vec<Device> {
        self.devices()
            .into_iter()
            .filter(|d| !d.is_coordinator())
            .collect()
    }

    fn coordinator(&self) -> Option<Device> {
        self.devices().into_iter().find(|d| d.is_coordinator())
    }

    /// The transaction sequence number the next outbound frame will carry.
    ///
    /// Must not consume the number. Every send numbers its frame before its
    /// first suspension point, so a caller that peeks and starts a send
    /// without yielding gets the peeked number on a current-thread runtime.
    fn peek_transaction_sequence(&self) -> u8;

    async fn read(
        &self,
        address: &str,
        endpoint: u8,
        cluster: &str,
        attributes: &[String],
    ) -> MeshResult<()>;

    async fn write(
        &self,
        address: &str,
        endpoint: u8,
        cluster: &str,
        attributes: Value,
    ) -> MeshResult<()>;

    async fn command(
        &self,
        address: &str,
        endpoint: u8,
        cluster: &str,
        command: &str,
        payload: Value,
    ) -> MeshResult<()>;

    /// Answer a command the device sent us.
    async fn command_response(
        &self,
        address: &str,
        endpoint: u8,
        cluster: &str,
        command: &str,
        payload: Value,
    ) -> MeshResult<()>;

    async fn ping(&self, address: &str) -> MeshResult<()>;

    async fn permit_join(&self, permit: bool) -> MeshResult<()>;

    /// Persisted configuration marker for a device.
    fn configured_marker(&self, address: &str) -> Option<u32>;

    fn set_configured_marker(&self, address: &str, marker: Option<u32>);
}

/// Wrapping 1..=255 transaction sequence counter.
///
/// Zero is never handed out.
#[derive(Debug, Default)]
pub struct TransactionSequence {
    current: AtomicU8,
}

impl TransactionSequence {
    pub fn new() -> Self {
        Self::default()
    }

    fn successor(current: u8) -> u8 {
        if current == u8::MAX {
            1
        } else {
            current + 1
        }
    }

    /// The number `next()` would return.
    pub fn peek(&self) -> u8 {
        Self::successor(self.current.load(Ordering::SeqCst))
    }

    /// Consume and return the next number.
    pub fn next(&self) -> u8 {
        let previous = self
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                Some(Self::successor(c))
            })
            .unwrap_or_else(|c| c);
        Self::successor(previous)
    }
}
