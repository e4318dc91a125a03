//! Mesh-backed accessory.
//!
//! Turns property maps into converter calls, correlates read replies, and
//! keeps the accessory's state context. State changes go out on a bounded
//! per-accessory channel.

use crate::context::AccessoryContext;
use crate::ordering::order_properties;
use crate::target::{publish_target, PublishTarget};
use homemesh_commands::CorrelationKey;
use homemesh_core::{Error, MeshMessage, Result};
use homemesh_devices::{
    decode_message, GetContext, ResolvedEntity, SetContext, StateMap, ToConverter,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

/// Direction of a state publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Publish {
    Set,
    Get,
}

impl Publish {
    fn as_str(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Get => "get",
        }
    }
}

/// One resolved converter invocation.
struct Job {
    converter: Arc<dyn ToConverter>,
    target: PublishTarget,
    value: Value,
}

struct AccessoryInner {
    address: String,
    entity: Option<Arc<ResolvedEntity>>,
    context: Arc<AccessoryContext>,
    state: RwLock<StateMap>,
    options: StateMap,
    state_tx: mpsc::Sender<StateMap>,
    state_rx: Mutex<Option<mpsc::Receiver<StateMap>>>,
}

/// An accessory backed by one mesh device.
#[derive(Clone)]
pub struct MeshAccessory {
    inner: Arc<AccessoryInner>,
}

impl MeshAccessory {
    /// Create an accessory. `entity` is `None` when the device could not be
    /// resolved; such an accessory only ever reports its cached state.
    pub fn new(
        address: impl Into<String>,
        entity: Option<Arc<ResolvedEntity>>,
        context: Arc<AccessoryContext>,
    ) -> Self {
        Self::with_state(address, entity, context, StateMap::new(), StateMap::new())
    }

    /// Create an accessory around a restored state context.
    pub fn with_state(
        address: impl Into<String>,
        entity: Option<Arc<ResolvedEntity>>,
        context: Arc<AccessoryContext>,
        state: StateMap,
        options: StateMap,
    ) -> Self {
        let capacity = context.config().state_channel_capacity.max(1);
        let (state_tx, state_rx) = mpsc::channel(capacity);
        Self {
            inner: Arc::new(AccessoryInner {
                address: address.into(),
                entity,
                context,
                state: RwLock::new(state),
                options,
                state_tx,
                state_rx: Mutex::new(Some(state_rx)),
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn entity(&self) -> Option<&Arc<ResolvedEntity>> {
        self.inner.entity.as_ref()
    }

    /// Display name: the model, or the address when unresolved.
    pub fn name(&self) -> String {
        match &self.inner.entity {
            Some(entity) => entity.descriptor.model().to_string(),
            None => self.inner.address.clone(),
        }
    }

    pub fn vendor(&self) -> Option<&str> {
        self.inner.entity.as_ref().map(|e| e.descriptor.vendor())
    }

    pub fn description(&self) -> Option<&str> {
        self.inner.entity.as_ref().map(|e| e.descriptor.description())
    }

    /// Snapshot of the state context.
    pub fn state(&self) -> StateMap {
        self.inner.state.read().clone()
    }

    /// Take the state-change receiver. Only the first caller gets it.
    pub fn subscribe_state(&self) -> Option<mpsc::Receiver<StateMap>> {
        self.inner.state_rx.lock().take()
    }

    /// Write properties.
    ///
    /// Converter calls run in a background task, one after another, so an
    /// unreachable device never stalls the caller. Returns the state context
    /// as it was when the writes were issued.
    pub fn set_state(&self, properties: StateMap, options: StateMap) -> StateMap {
        let inner = &self.inner;
        let snapshot = self.state();
        let Some((entity, endpoint)) = inner.target_entity() else {
            return snapshot;
        };

        let jobs = inner.plan(&entity, endpoint, &properties, &snapshot, Publish::Set);
        if jobs.is_empty() {
            return snapshot;
        }

        let task_inner = Arc::clone(inner);
        let task_snapshot = snapshot.clone();
        tokio::spawn(async move {
            task_inner
                .run_writes(entity, jobs, properties, task_snapshot, options)
                .await;
        });

        snapshot
    }

    /// Read properties and wait for the replies.
    ///
    /// Each read is correlated by device, endpoint and the transaction
    /// sequence number it goes out with. Decoded replies are merged into the
    /// state context without a state-change notification. Fails when any
    /// issued read cannot be sent or is not answered in time, leaving the
    /// state context untouched.
    pub async fn get_state(&self, properties: StateMap, options: StateMap) -> Result<StateMap> {
        let inner = &self.inner;
        let snapshot = self.state();
        let Some((entity, endpoint)) = inner.target_entity() else {
            return Ok(snapshot);
        };

        let jobs = inner.plan(&entity, endpoint, &properties, &snapshot, Publish::Get);
        if jobs.is_empty() {
            return Ok(snapshot);
        }

        let keys = inner.issue_reads(&entity, jobs, &snapshot, &options).await?;

        let replies = inner.context.queue().wait_all(&keys).await.map_err(|e| {
            tracing::warn!("Publish 'get' to '{}' failed: {}", entity.name(), e);
            Error::from(e)
        })?;

        let mut delta = StateMap::new();
        for reply in &replies {
            delta.extend(decode_message(&entity, reply, &snapshot, &inner.options));
        }
        tracing::debug!("Read state for '{}': {:?}", entity.name(), delta);
        Ok(inner.merge(delta, false))
    }

    /// Handle an inbound message for this device.
    ///
    /// A reply to one of our reads completes it. Anything else is decoded,
    /// merged and announced.
    pub fn process_message(&self, message: &MeshMessage) {
        let inner = &self.inner;
        if let Some(tsn) = message.transaction_sequence {
            let key = CorrelationKey::new(&message.address, message.endpoint, tsn).to_string();
            if inner.context.queue().contains(&key)
                && inner.context.queue().resolve(&key, message.clone())
            {
                tracing::trace!("Message '{}' completed a pending read", key);
                return;
            }
        }

        let Some(entity) = inner.entity.as_ref() else {
            return;
        };

        let snapshot = self.state();
        let decoded = decode_message(entity, message, &snapshot, &inner.options);
        tracing::debug!("Decoded state for '{}' from incoming message: {:?}", entity.name(), decoded);
        if !decoded.is_empty() {
            inner.merge(decoded, true);
        }
    }
}

impl AccessoryInner {
    /// The resolved entity and its default endpoint, or a warning.
    fn target_entity(&self) -> Option<(Arc<ResolvedEntity>, u8)> {
        let Some(entity) = self.entity.clone() else {
            tracing::warn!("Device '{}' is not supported, returning cached state", self.address);
            return None;
        };
        let Some(endpoint) = entity.default_endpoint().map(|e| e.id) else {
            tracing::warn!("Device with model '{}' has no endpoint", entity.name());
            return None;
        };
        Some((entity, endpoint))
    }

    /// Resolve target and converter for every property.
    ///
    /// A write runs each converter at most once per endpoint per call. A
    /// read converter only reads the key it is given, so reads are
    /// deduplicated per key as well.
    fn plan(
        &self,
        entity: &ResolvedEntity,
        endpoint: u8,
        properties: &StateMap,
        state: &StateMap,
        publish: Publish,
    ) -> Vec<Job> {
        let descriptor = &entity.descriptor;
        let mut used: HashSet<(usize, u8, Option<String>)> = HashSet::new();
        let mut jobs = Vec::new();

        for (original_key, value) in order_properties(properties, state) {
            let Some(target) = publish_target(entity, endpoint, &original_key) else {
                continue;
            };

            let Some((index, converter)) = descriptor.find_to_converter(&target.key) else {
                tracing::warn!("No converter available for '{}' ({})", target.key, value);
                continue;
            };

            let supported = match publish {
                Publish::Set => converter.supports_set(),
                Publish::Get => converter.supports_get(),
            };
            if !supported {
                tracing::warn!(
                    "No converter available for '{}' '{}' ({})",
                    publish.as_str(),
                    target.key,
                    value
                );
                continue;
            }

            if publish == Publish::Set {
                if let Some(spec) = descriptor.schema().get(&target.key) {
                    if !spec.is_writable() {
                        tracing::warn!("Property '{}' of '{}' is read-only", target.key, entity.name());
                        continue;
                    }
                    if !spec.kind.accepts(&value) {
                        tracing::warn!(
                            "Invalid value {} for property '{}' of '{}'",
                            value,
                            target.key,
                            entity.name()
                        );
                        continue;
                    }
                }
            }

            let read_key = match publish {
                Publish::Set => None,
                Publish::Get => Some(target.key.clone()),
            };
            if !used.insert((index, target.endpoint, read_key)) {
                continue;
            }

            jobs.push(Job {
                converter: Arc::clone(converter),
                target,
                value,
            });
        }
        jobs
    }

    async fn run_writes(
        self: Arc<Self>,
        entity: Arc<ResolvedEntity>,
        jobs: Vec<Job>,
        message: StateMap,
        state: StateMap,
        options: StateMap,
    ) {
        let stack = Arc::clone(self.context.stack());
        for job in jobs {
            tracing::debug!(
                "Publishing 'set' '{}' with '{}' to '{}'",
                job.target.key,
                job.value,
                entity.name()
            );
            let ctx = SetContext {
                stack: stack.as_ref(),
                device: &entity.device,
                endpoint: job.target.endpoint,
                endpoint_name: job.target.endpoint_name.as_deref(),
                key: &job.target.key,
                value: &job.value,
                message: &message,
                state: &state,
                options: &options,
            };

            let outcome = job.converter.convert_set(&ctx).await;
            match outcome {
                Ok(Some(result)) => {
                    if !result.state.is_empty() {
                        self.merge(result.state, true);
                    }
                    if let Some(delay) = result.read_after_write {
                        if self.context.config().retrieve_state {
                            Arc::clone(&self).schedule_read(
                                Arc::clone(&entity),
                                job,
                                delay,
                                options.clone(),
                            );
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        "Publish 'set' '{}' to '{}' failed: {}",
                        job.target.key,
                        entity.name(),
                        e
                    );
                }
            }
        }
    }

    /// Re-read a property once the device has settled. The reply arrives
    /// as an ordinary report.
    fn schedule_read(
        self: Arc<Self>,
        entity: Arc<ResolvedEntity>,
        job: Job,
        delay: Duration,
        options: StateMap,
    ) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let state = self.state.read().clone();
            let stack = Arc::clone(self.context.stack());
            let ctx = GetContext {
                stack: stack.as_ref(),
                device: &entity.device,
                endpoint: job.target.endpoint,
                endpoint_name: job.target.endpoint_name.as_deref(),
                key: &job.target.key,
                state: &state,
                options: &options,
            };
            if let Err(e) = job.converter.convert_get(&ctx).await {
                tracing::warn!(
                    "Read after write of '{}' to '{}' failed: {}",
                    job.target.key,
                    entity.name(),
                    e
                );
            }
        });
    }

    /// Send every read and register its correlation entry.
    ///
    /// The peeked sequence number is only valid if the read is numbered
    /// before this task yields, which the stack guarantees on a
    /// current-thread runtime. Reads are not serialised, so a device that
    /// never acknowledges only holds up its own caller.
    ///
    /// On failure all entries registered so far are dropped.
    async fn issue_reads(
        &self,
        entity: &ResolvedEntity,
        jobs: Vec<Job>,
        state: &StateMap,
        options: &StateMap,
    ) -> Result<Vec<String>> {
        let queue = self.context.queue();
        let stack = Arc::clone(self.context.stack());
        let mut keys = Vec::with_capacity(jobs.len());

        for job in jobs {
            let result = {
                let tsn = stack.peek_transaction_sequence();
                let key = CorrelationKey::new(entity.address(), job.target.endpoint, tsn);
                match queue.enqueue(key, None) {
                    Ok(key) => {
                        tracing::debug!("Publishing 'get' '{}' to '{}'", job.target.key, entity.name());
                        let ctx = GetContext {
                            stack: stack.as_ref(),
                            device: &entity.device,
                            endpoint: job.target.endpoint,
                            endpoint_name: job.target.endpoint_name.as_deref(),
                            key: &job.target.key,
                            state,
                            options,
                        };
                        let deadline = Instant::now() + queue.default_timeout();
                        let sent = match timeout_at(deadline, job.converter.convert_get(&ctx)).await {
                            Ok(result) => result,
                            Err(_) => Err(Error::timeout(format!(
                                "sending read of '{}' timed out",
                                job.target.key
                            ))),
                        };
                        match sent {
                            Ok(()) => Ok(key),
                            Err(e) => {
                                queue.cancel(&key);
                                Err(e)
                            }
                        }
                    }
                    Err(e) => Err(Error::from(e)),
                }
            };

            match result {
                Ok(key) => keys.push(key),
                Err(e) => {
                    tracing::warn!(
                        "Publish 'get' '{}' to '{}' failed: {}",
                        job.target.key,
                        entity.name(),
                        e
                    );
                    for key in &keys {
                        queue.cancel(key);
                    }
                    return Err(e);
                }
            }
        }
        Ok(keys)
    }

    /// Merge a delta into the state context and optionally announce it.
    fn merge(&self, delta: StateMap, announce: bool) -> StateMap {
        let snapshot = {
            let mut state = self.state.write();
            state.extend(delta.clone());
            state.clone()
        };
        tracing::debug!("Updated state for '{}' is now {:?}", self.address, snapshot);

        // Updates are only queued once a consumer holds the receiver
        if announce && self.state_rx.lock().is_none() {
            match self.state_tx.try_send(delta) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("State channel of '{}' is full, dropping update", self.address);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::trace!("State channel of '{}' is closed", self.address);
                }
            }
        }
        snapshot
    }
}
