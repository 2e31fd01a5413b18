//! Pending command correlation.
//!
//! Each `invoke` registers an entry keyed by its message id. The entry is
//! settled by exactly one of: the matching response, its timer, `destroy`, or
//! a failed write. Whoever removes the entry from the table settles it; a late
//! arrival finds nothing and is ignored.

use crate::error::{BridgeError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

struct PendingEntry {
    action: String,
    reply: oneshot::Sender<Result<Value>>,
    timer: JoinHandle<()>,
}

/// Table of commands awaiting a response.
#[derive(Clone)]
pub(crate) struct Correlations {
    entries: Arc<Mutex<HashMap<String, PendingEntry>>>,
    timeout: Duration,
    runtime: Handle,
}

impl Correlations {
    pub(crate) fn new(timeout: Duration, runtime: Handle) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            timeout,
            runtime,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `message_id` and arm its timer.
    pub(crate) fn register(&self, message_id: &str, action: &str) -> PendingResponse {
        let (reply, rx) = oneshot::channel();

        let table = self.clone();
        let id = message_id.to_string();
        let timeout = self.timeout;

        let mut entries = self.entries();
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            table.expire(&id);
        });
        entries.insert(
            message_id.to_string(),
            PendingEntry {
                action: action.to_string(),
                reply,
                timer,
            },
        );

        PendingResponse {
            message_id: message_id.to_string(),
            rx,
        }
    }

    /// Settle `message_id` with `result`. Returns false if it was not pending.
    pub(crate) fn settle(&self, message_id: &str, result: Result<Value>) -> bool {
        let Some(entry) = self.entries().remove(message_id) else {
            return false;
        };
        entry.timer.abort();
        // The caller may have dropped its PendingResponse.
        let _ = entry.reply.send(result);
        true
    }

    fn expire(&self, message_id: &str) {
        let Some(entry) = self.entries().remove(message_id) else {
            return;
        };
        debug!(
            "Command '{}' ({}) timed out after {:?}",
            entry.action, message_id, self.timeout
        );
        let _ = entry.reply.send(Err(BridgeError::Timeout {
            action: entry.action,
            timeout: self.timeout,
        }));
    }

    /// Reject every pending entry and empty the table.
    pub(crate) fn reject_all(&self, reason: impl Fn() -> BridgeError) -> usize {
        let drained: Vec<PendingEntry> = self.entries().drain().map(|(_, entry)| entry).collect();
        let count = drained.len();
        for entry in drained {
            entry.timer.abort();
            let _ = entry.reply.send(Err(reason()));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.entries().len()
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Deferred result of an `invoke`.
///
/// Resolves with the remote handler's value, or fails with
/// [`BridgeError::Timeout`], [`BridgeError::RemoteHandler`],
/// [`BridgeError::InstanceDestroyed`] or the transport's send error.
/// Dropping it does not cancel the command.
#[derive(Debug)]
#[must_use = "a PendingResponse does nothing unless awaited"]
pub struct PendingResponse {
    message_id: String,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingResponse {
    /// Message id of the command envelope, shared by its response.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }
}

impl Future for PendingResponse {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Sender dropped unsettled: the table itself went away.
            Poll::Ready(Err(_)) => Poll::Ready(Err(BridgeError::InstanceDestroyed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(ms: u64) -> Correlations {
        Correlations::new(Duration::from_millis(ms), Handle::current())
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_resolves_once() {
        let correlations = table(1000);
        let pending = correlations.register("ipcbridge_1", "sum");
        assert_eq!(correlations.len(), 1);

        assert!(correlations.settle("ipcbridge_1", Ok(json!(5))));
        assert!(!correlations.settle("ipcbridge_1", Ok(json!(6))));
        assert_eq!(correlations.len(), 0);

        assert_eq!(pending.await.unwrap(), json!(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_rejects_with_timeout() {
        let correlations = table(200);
        let pending = correlations.register("ipcbridge_2", "slow");
        let started = tokio::time::Instant::now();

        let err = pending.await.unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { ref action, .. } if action == "slow"));
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(correlations.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_after_timeout_is_ignored() {
        let correlations = table(50);
        let pending = correlations.register("ipcbridge_3", "late");

        assert!(pending.await.unwrap_err().is_timeout());
        assert!(!correlations.settle("ipcbridge_3", Ok(json!("too late"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_all_drains_table() {
        let correlations = table(1000);
        let first = correlations.register("ipcbridge_a", "a");
        let second = correlations.register("ipcbridge_b", "b");

        assert_eq!(correlations.reject_all(|| BridgeError::InstanceDestroyed), 2);
        assert_eq!(correlations.len(), 0);

        assert!(first.await.unwrap_err().is_destroyed());
        assert!(second.await.unwrap_err().is_destroyed());
    }
}
