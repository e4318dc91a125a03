//! Over-the-air update negotiation.
//!
//! Devices poll for new firmware with a next-image query, often several
//! times a minute. The upstream availability check is throttled per device,
//! and the device is always answered so it stops asking: "abort" when the
//! model supports updates (nothing is applied automatically), "no image
//! available" otherwise.

use crate::error::Result;
use crate::extension::Extension;
use async_trait::async_trait;
use homemesh_core::message::{clusters, message_types};
use homemesh_core::{MeshEvent, MeshMessage};
use homemesh_devices::{EntityResolver, MeshStack, ResolvedEntity};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Try again later.
pub const STATUS_ABORT: u8 = 0x95;
pub const STATUS_NO_IMAGE_AVAILABLE: u8 = 0x98;

pub const QUERY_NEXT_IMAGE_RESPONSE: &str = "queryNextImageResponse";

#[derive(Debug, Default)]
struct OtaRecord {
    last_checked: Option<Instant>,
    in_progress: bool,
}

pub struct OtaExtension {
    resolver: Arc<EntityResolver>,
    stack: Arc<dyn MeshStack>,
    check_interval: Duration,
    disable_automatic_check: bool,
    records: Mutex<HashMap<String, OtaRecord>>,
}

impl OtaExtension {
    pub fn new(resolver: Arc<EntityResolver>, check_interval: Duration) -> Self {
        Self {
            stack: Arc::clone(resolver.stack()),
            resolver,
            check_interval,
            disable_automatic_check: false,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_automatic_check(mut self, enabled: bool) -> Self {
        self.disable_automatic_check = !enabled;
        self
    }

    /// Mark a check as started, unless one ran recently or is running.
    fn begin_check(&self, address: &str) -> bool {
        let mut records = self.records.lock();
        let record = records.entry(address.to_string()).or_default();
        let due = record
            .last_checked
            .map_or(true, |at| at.elapsed() > self.check_interval);
        if !due || record.in_progress {
            return false;
        }
        record.last_checked = Some(Instant::now());
        record.in_progress = true;
        true
    }

    fn finish_check(&self, address: &str) {
        if let Some(record) = self.records.lock().get_mut(address) {
            record.in_progress = false;
        }
    }

    async fn check_for_update(&self, entity: &ResolvedEntity, message: &MeshMessage) {
        let Some(hook) = entity.descriptor.ota_hook() else {
            return;
        };
        if self.disable_automatic_check || !self.begin_check(entity.address()) {
            return;
        }

        let outcome = hook.is_update_available(&entity.device, &message.data).await;
        self.finish_check(entity.address());

        match outcome {
            Ok(true) => tracing::info!("Update available for '{}'", entity.name()),
            Ok(false) => tracing::debug!("No update available for '{}'", entity.name()),
            Err(e) => tracing::warn!(
                "Failed to check if update available for '{}': {}",
                entity.name(),
                e
            ),
        }
    }

    async fn respond(&self, entity: &ResolvedEntity) -> Result<()> {
        // Some devices query without listing the cluster as an input
        let Some(endpoint) = entity
            .device
            .endpoints
            .iter()
            .find(|e| e.supports_output_cluster(clusters::OTA))
        else {
            tracing::debug!("Device '{}' has no OTA endpoint, not responding", entity.name());
            return Ok(());
        };

        let status = if entity.descriptor.supports_ota() {
            STATUS_ABORT
        } else {
            STATUS_NO_IMAGE_AVAILABLE
        };
        tracing::info!(
            "Responding to device '{}' OTA request with status {:#04x}",
            entity.name(),
            status
        );
        self.stack
            .command_response(
                entity.address(),
                endpoint.id,
                clusters::OTA,
                QUERY_NEXT_IMAGE_RESPONSE,
                json!({ "status": status }),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Extension for OtaExtension {
    fn name(&self) -> &str {
        "ota"
    }

    fn accepts(&self, event: &MeshEvent) -> bool {
        matches!(
            event,
            MeshEvent::Message { message }
                if message.message_type == message_types::QUERY_NEXT_IMAGE_REQUEST
        )
    }

    async fn handle_event(&self, event: &MeshEvent) -> Result<()> {
        let MeshEvent::Message { message } = event else {
            return Ok(());
        };
        if message.message_type != message_types::QUERY_NEXT_IMAGE_REQUEST {
            return Ok(());
        }
        let Some(entity) = self.resolver.resolve(&message.address) else {
            return Ok(());
        };

        self.check_for_update(&entity, message).await;
        self.respond(&entity).await
    }
}
