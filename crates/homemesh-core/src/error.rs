//! Unified error handling for HomeMesh.
//!
//! Crates with a self-contained concern (correlation queue, descriptor
//! validation, mesh stack) keep their own error enums and convert into
//! this type at the boundary.

/// Unified error type for HomeMesh.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Encoder or decoder failure inside a converter.
    #[error("Converter error: {0}")]
    Converter(String),

    /// Timeout errors.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Reply correlation errors other than timeouts.
    #[error("Correlation error: {0}")]
    Correlation(String),

    /// Errors reported by the mesh radio stack.
    #[error("Mesh error: {0}")]
    Mesh(String),

    /// Device configuration hook failures.
    #[error("Configure error: {0}")]
    Configure(String),

    /// Validation errors.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Generic internal errors.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Not found errors.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn converter(msg: impl Into<String>) -> Self {
        Self::Converter(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn mesh(msg: impl Into<String>) -> Self {
        Self::Mesh(msg.into())
    }

    /// Whether this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

// Error conversion helpers
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Internal(format!("{:#}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let err = Error::converter(format!("no decoder for cluster '{}'", "genOnOff"));
        assert_eq!(
            err.to_string(),
            "Converter error: no decoder for cluster 'genOnOff'"
        );
        assert!(Error::timeout("read").is_timeout());
        assert!(!Error::mesh("read").is_timeout());
    }

    #[test]
    fn test_json_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
