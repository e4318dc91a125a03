//! Inbound message decoding.

use crate::converter::{DecodeContext, StateMap};
use crate::resolver::ResolvedEntity;
use homemesh_core::MeshMessage;

/// Decode an inbound message through every matching decoder.
///
/// Decoders are applied in declaration order and later ones overwrite
/// earlier keys. A message no decoder claims is reported unless it is
/// housekeeping traffic (OTA, time). Returns an empty map when nothing
/// decoded.
pub fn decode_message(
    entity: &ResolvedEntity,
    message: &MeshMessage,
    state: &StateMap,
    options: &StateMap,
) -> StateMap {
    let descriptor = &entity.descriptor;
    let matching: Vec<_> = descriptor
        .from_converters()
        .iter()
        .filter(|c| c.matches(message))
        .collect();

    if matching.is_empty() {
        if !message.is_housekeeping() {
            tracing::warn!(
                "No converter available for '{}' with cluster '{}' and type '{}' and data '{}'",
                descriptor.model(),
                message.cluster,
                message.message_type,
                message.data
            );
        }
        return StateMap::new();
    }

    let ctx = DecodeContext {
        device: &entity.device,
        endpoint_name: entity.endpoint_name(message.endpoint),
        state,
        options,
    };

    let mut payload = StateMap::new();
    for converter in matching {
        if let Some(decoded) = converter.convert(message, &ctx) {
            payload.extend(decoded);
        }
    }
    payload
}
