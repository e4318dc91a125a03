//! Extension error type.

use thiserror::Error;

/// Result type for extension operations.
pub type Result<T> = std::result::Result<T, ExtensionError>;

#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("Extension '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Extensions are already running")]
    AlreadyRunning,

    #[error("Device '{0}' not found")]
    DeviceNotFound(String),

    #[error("Failed to configure '{device}', attempt {attempt}: {reason}")]
    ConfigureFailed {
        device: String,
        attempt: u32,
        reason: String,
    },

    #[error("Accessory host error: {0}")]
    Host(String),

    #[error(transparent)]
    Core(#[from] homemesh_core::Error),
}

impl From<homemesh_devices::MeshError> for ExtensionError {
    fn from(e: homemesh_devices::MeshError) -> Self {
        Self::Core(e.into())
    }
}

impl From<ExtensionError> for homemesh_core::Error {
    fn from(e: ExtensionError) -> Self {
        match e {
            ExtensionError::Core(inner) => inner,
            ExtensionError::DeviceNotFound(_) => homemesh_core::Error::NotFound(e.to_string()),
            ExtensionError::ConfigureFailed { .. } => homemesh_core::Error::Configure(e.to_string()),
            other => homemesh_core::Error::Internal(other.to_string()),
        }
    }
}
