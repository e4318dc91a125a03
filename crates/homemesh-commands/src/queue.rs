//! Pending-reply registry.
//!
//! Each entry is a oneshot channel plus a deadline. The sending half is
//! completed by `resolve`, the receiving half is consumed by `wait_all`.
//! An entry is consumed exactly once: after `wait_all` settles it (reply,
//! timeout or cancellation) the key is gone, and a late reply for it makes
//! `resolve` return `false`.

use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};

/// Queue error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Message response timeout for '{key}' after {timeout_ms}ms")]
    Timeout { key: String, timeout_ms: u64 },

    #[error("No pending entry for '{0}'")]
    NotFound(String),

    #[error("Entry '{0}' is already pending")]
    Duplicate(String),

    #[error("Entry '{0}' was cancelled before a reply arrived")]
    Closed(String),
}

impl QueueError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<QueueError> for homemesh_core::Error {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Timeout { .. } => homemesh_core::Error::Timeout(e.to_string()),
            other => homemesh_core::Error::Correlation(other.to_string()),
        }
    }
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;

struct PendingEntry<T> {
    responder: Option<oneshot::Sender<T>>,
    receiver: Option<oneshot::Receiver<T>>,
    deadline: Instant,
    timeout: Duration,
}

impl<T> PendingEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// Correlates asynchronous replies with the requests that caused them.
pub struct CorrelationQueue<T> {
    entries: Mutex<HashMap<String, PendingEntry<T>>>,
    default_timeout: Duration,
}

impl<T: Send + 'static> CorrelationQueue<T> {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Register a pending reply under `key`.
    ///
    /// The deadline starts now. Returns the key so it can be collected for
    /// `wait_all`. Fails if `key` is already pending.
    pub fn enqueue(
        &self,
        key: impl Into<String>,
        timeout: Option<Duration>,
    ) -> QueueResult<String> {
        let key = key.into();
        let timeout = timeout.unwrap_or(self.default_timeout);
        let now = Instant::now();

        let mut entries = self.entries.lock();
        // Expired entries nobody waited on would otherwise linger
        entries.retain(|_, entry| entry.receiver.is_none() || !entry.is_expired(now));

        if entries.contains_key(&key) {
            return Err(QueueError::Duplicate(key));
        }

        let (tx, rx) = oneshot::channel();
        entries.insert(
            key.clone(),
            PendingEntry {
                responder: Some(tx),
                receiver: Some(rx),
                deadline: now + timeout,
                timeout,
            },
        );
        tracing::trace!("Enqueued '{}' with timeout {:?}", key, timeout);
        Ok(key)
    }

    /// Complete the pending entry for `key`.
    ///
    /// Returns `false` when nothing is waiting for it: unknown key, already
    /// completed, or past its deadline. The caller then handles the value as
    /// unsolicited.
    pub fn resolve(&self, key: &str, value: T) -> bool {
        let mut entries = self.entries.lock();

        let Some(entry) = entries.get_mut(key) else {
            tracing::debug!("Correlation entry '{}' not found", key);
            return false;
        };

        if entry.is_expired(Instant::now()) {
            tracing::debug!("Correlation entry '{}' already expired", key);
            if entry.receiver.is_some() {
                entries.remove(key);
            }
            return false;
        }

        let Some(responder) = entry.responder.take() else {
            tracing::debug!("Correlation entry '{}' already resolved", key);
            return false;
        };

        let delivered = responder.send(value).is_ok();
        if entry.receiver.is_none() {
            // Already being waited on; the waiter owns the rest
            entries.remove(key);
        }
        delivered
    }

    /// Drop a pending entry, e.g. when the request could not be sent.
    ///
    /// A waiter already holding the entry sees `QueueError::Closed`.
    pub fn cancel(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Wait for every key to settle.
    ///
    /// Each entry races its reply against its own deadline, so the whole call
    /// is bounded by the latest deadline. All entries are consumed whatever
    /// the outcome. If any entry fails, the call fails with the first error
    /// in key order; partial results are never returned.
    pub async fn wait_all(&self, keys: &[String]) -> QueueResult<Vec<T>> {
        let mut waiters = Vec::with_capacity(keys.len());
        let mut missing = None;
        {
            let mut entries = self.entries.lock();
            for key in keys {
                let taken = entries.get_mut(key).and_then(|entry| {
                    entry
                        .receiver
                        .take()
                        .map(|rx| (rx, entry.deadline, entry.timeout))
                });
                match taken {
                    Some((rx, deadline, timeout)) => {
                        waiters.push((key.clone(), rx, deadline, timeout))
                    }
                    None => {
                        if missing.is_none() {
                            missing = Some(key.clone());
                        }
                    }
                }
            }

            if let Some(key) = missing {
                for (taken, _, _, _) in &waiters {
                    entries.remove(taken);
                }
                return Err(QueueError::NotFound(key));
            }
        }

        let outcomes = join_all(waiters.into_iter().map(|(key, rx, deadline, timeout)| async move {
            let outcome = match timeout_at(deadline, rx).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(_)) => Err(QueueError::Closed(key.clone())),
                Err(_) => Err(QueueError::Timeout {
                    key: key.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };
            (key, outcome)
        }))
        .await;

        let mut values = Vec::with_capacity(outcomes.len());
        let mut first_error = None;
        {
            let mut entries = self.entries.lock();
            for (key, outcome) in outcomes {
                entries.remove(&key);
                match outcome {
                    Ok(value) => values.push(value),
                    Err(e) => {
                        tracing::debug!("Correlation wait failed: {}", e);
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(values),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Number of entries not yet consumed.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
