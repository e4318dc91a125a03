//! Request/response correlation for mesh commands.
//!
//! Provides:
//! - `CorrelationQueue`: pending-reply registry with per-entry deadlines
//! - `CorrelationKey`: device address + endpoint + transaction sequence number

pub mod key;
pub mod queue;

pub use key::CorrelationKey;
pub use queue::{CorrelationQueue, QueueError, QueueResult};
