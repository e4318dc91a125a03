//! Correlation keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one outstanding read: the reply from `address` on `endpoint`
/// carrying `transaction_sequence` completes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationKey {
    pub address: String,
    pub endpoint: u8,
    pub transaction_sequence: u8,
}

impl CorrelationKey {
    pub fn new(address: impl Into<String>, endpoint: u8, transaction_sequence: u8) -> Self {
        Self {
            address: address.into(),
            endpoint,
            transaction_sequence,
        }
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.address, self.endpoint, self.transaction_sequence
        )
    }
}

impl From<CorrelationKey> for String {
    fn from(key: CorrelationKey) -> Self {
        key.to_string()
    }
}
