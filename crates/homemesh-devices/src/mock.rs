//! In-memory mesh stack for tests and local development.

use crate::mesh::{MeshError, MeshResult, MeshStack, StackEvent, StackEventStream, TransactionSequence};
use crate::model::Device;
use async_trait::async_trait;
use homemesh_core::MeshMessage;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

/// An outbound operation recorded by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Read {
        address: String,
        endpoint: u8,
        cluster: String,
        attributes: Vec<String>,
        transaction_sequence: u8,
    },
    Write {
        address: String,
        endpoint: u8,
        cluster: String,
        attributes: Value,
        transaction_sequence: u8,
    },
    Command {
        address: String,
        endpoint: u8,
        cluster: String,
        command: String,
        payload: Value,
        transaction_sequence: u8,
    },
    CommandResponse {
        address: String,
        endpoint: u8,
        cluster: String,
        command: String,
        payload: Value,
    },
    Ping {
        address: String,
    },
    PermitJoin(bool),
}

impl MockCall {
    pub fn address(&self) -> Option<&str> {
        match self {
            Self::Read { address, .. }
            | Self::Write { address, .. }
            | Self::Command { address, .. }
            | Self::CommandResponse { address, .. }
            | Self::Ping { address } => Some(address),
            Self::PermitJoin(_) => None,
        }
    }

    pub fn transaction_sequence(&self) -> Option<u8> {
        match self {
            Self::Read {
                transaction_sequence,
                ..
            }
            | Self::Write {
                transaction_sequence,
                ..
            }
            | Self::Command {
                transaction_sequence,
                ..
            } => Some(*transaction_sequence),
            _ => None,
        }
    }
}

type ReadResponder = Box<dyn Fn(&MockCall) -> Option<MeshMessage> + Send + Sync>;

/// Mock mesh stack.
///
/// Records every outbound call, hands out transaction sequence numbers like
/// a real stack, and lets tests inject events, unreachable devices and
/// start failures.
pub struct MockMeshStack {
    devices: RwLock<Vec<Device>>,
    calls: Mutex<Vec<MockCall>>,
    tsn: TransactionSequence,
    event_tx: broadcast::Sender<StackEvent>,
    running: AtomicBool,
    start_failures: AtomicU32,
    unreachable: RwLock<HashSet<String>>,
    markers: RwLock<HashMap<String, u32>>,
    read_responder: RwLock<Option<ReadResponder>>,
    read_delays: RwLock<HashMap<String, Duration>>,
}

impl MockMeshStack {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            devices: RwLock::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            tsn: TransactionSequence::new(),
            event_tx,
            running: AtomicBool::new(false),
            start_failures: AtomicU32::new(0),
            unreachable: RwLock::new(HashSet::new()),
            markers: RwLock::new(HashMap::new()),
            read_responder: RwLock::new(None),
            read_delays: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_device(self, device: Device) -> Self {
        self.add_device(device);
        self
    }

    /// Add or replace a device.
    pub fn add_device(&self, device: Device) {
        let mut devices = self.devices.write();
        devices.retain(|d| d.address != device.address);
        devices.push(device);
    }

    pub fn remove_device(&self, address: &str) {
        self.devices.write().retain(|d| d.address != address);
        self.markers.write().remove(address);
    }

    /// Inject a raw stack event. Returns the number of subscribers reached.
    pub fn emit(&self, event: StackEvent) -> usize {
        self.event_tx.send(event).unwrap_or(0)
    }

    /// Fail the next `count` calls to `start`.
    pub fn fail_start(&self, count: u32) {
        self.start_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, address: &str, unreachable: bool) {
        let mut set = self.unreachable.write();
        if unreachable {
            set.insert(address.to_string());
        } else {
            set.remove(address);
        }
    }

    /// Answer reads automatically by emitting the returned message.
    ///
    /// The reply carries the transaction sequence of the read.
    pub fn set_read_responder<F>(&self, responder: F)
    where
        F: Fn(&MockCall) -> Option<MeshMessage> + Send + Sync + 'static,
    {
        *self.read_responder.write() = Some(Box::new(responder));
    }

    /// Hold reads to `address` for `delay` after the frame is numbered,
    /// like a stack waiting for the device's acknowledgement.
    pub fn set_read_delay(&self, address: &str, delay: Duration) {
        self.read_delays.write().insert(address.to_string(), delay);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, address: &str) -> Vec<MockCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.address() == Some(address))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }

    fn check_reachable(&self, address: &str) -> MeshResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(MeshError::Stopped);
        }
        if self.unreachable.read().contains(address) {
            return Err(MeshError::Unreachable(address.to_string()));
        }
        if !self.devices.read().iter().any(|d| d.address == address) {
            return Err(MeshError::DeviceNotFound(address.to_string()));
        }
        Ok(())
    }
}

impl Default for MockMeshStack {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MeshStack for MockMeshStack {
    async fn start(&self) -> MeshResult<()> {
        let remaining = self.start_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.start_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(MeshError::Other(anyhow::anyhow!("adapter not responding")));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> MeshResult<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> StackEventStream {
        let mut rx = self.event_tx.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn devices(&self) -> Vec<Device> {
        self.devices.read().clone()
    }

    fn device(&self, address: &str) -> Option<Device> {
        self.devices
            .read()
            .iter()
            .find(|d| d.address == address)
            .cloned()
    }

    fn peek_transaction_sequence(&self) -> u8 {
        self.tsn.peek()
    }

    async fn read(
        &self,
        address: &str,
        endpoint: u8,
        cluster: &str,
        attributes: &[String],
    ) -> MeshResult<()> {
        let transaction_sequence = self.tsn.next();
        let call = MockCall::Read {
            address: address.to_string(),
            endpoint,
            cluster: cluster.to_string(),
            attributes: attributes.to_vec(),
            transaction_sequence,
        };
        self.record(call.clone());
        self.check_reachable(address)?;

        let delay = self.read_delays.read().get(address).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .read_responder
            .read()
            .as_ref()
            .and_then(|responder| responder(&call));
        if let Some(message) = reply {
            self.emit(StackEvent::Message(
                message.with_transaction_sequence(transaction_sequence),
            ));
        }
        Ok(())
    }

    async fn write(
        &self,
        address: &str,
        endpoint: u8,
        cluster: &str,
        attributes: Value,
    ) -> MeshResult<()> {
        let transaction_sequence = self.tsn.next();
        self.record(MockCall::Write {
            address: address.to_string(),
            endpoint,
            cluster: cluster.to_string(),
            attributes,
            transaction_sequence,
        });
        self.check_reachable(address)
    }

    async fn command(
        &self,
        address: &str,
        endpoint: u8,
        cluster: &str,
        command: &str,
        payload: Value,
    ) -> MeshResult<()> {
        let transaction_sequence = self.tsn.next();
        self.record(MockCall::Command {
            address: address.to_string(),
            endpoint,
            cluster: cluster.to_string(),
            command: command.to_string(),
            payload,
            transaction_sequence,
        });
        self.check_reachable(address)
    }

    async fn command_response(
        &self,
        address: &str,
        endpoint: u8,
        cluster: &str,
        command: &str,
        payload: Value,
    ) -> MeshResult<()> {
        self.record(MockCall::CommandResponse {
            address: address.to_string(),
            endpoint,
            cluster: cluster.to_string(),
            command: command.to_string(),
            payload,
        });
        self.check_reachable(address)
    }

    async fn ping(&self, address: &str) -> MeshResult<()> {
        self.record(MockCall::Ping {
            address: address.to_string(),
        });
        self.check_reachable(address)
    }

    async fn permit_join(&self, permit: bool) -> MeshResult<()> {
        self.record(MockCall::PermitJoin(permit));
        Ok(())
    }

    fn configured_marker(&self, address: &str) -> Option<u32> {
        self.markers.read().get(address).copied()
    }

    fn set_configured_marker(&self, address: &str, marker: Option<u32>) {
        let mut markers = self.markers.write();
        match marker {
            Some(marker) => {
                markers.insert(address.to_string(), marker);
            }
            None => {
                markers.remove(address);
            }
        }
    }
}
