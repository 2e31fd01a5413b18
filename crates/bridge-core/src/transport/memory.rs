//! In-process transport pair.

use super::{InboundStream, Transport};
use crate::error::{BridgeError, Result};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// One end of a linked in-memory channel.
///
/// Clones share the same endpoint, so a test can keep a handle and push raw
/// (possibly foreign) values to the peer while a bridge owns another clone.
#[derive(Clone)]
pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<Value>,
    inbound: Arc<Mutex<Option<InboundStream>>>,
}

impl MemoryTransport {
    /// Create two endpoints wired to each other.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = Self {
            outbound: b_tx,
            inbound: Arc::new(Mutex::new(Some(a_rx))),
        };
        let b = Self {
            outbound: a_tx,
            inbound: Arc::new(Mutex::new(Some(b_rx))),
        };
        (a, b)
    }
}

impl Transport for MemoryTransport {
    fn send(&self, payload: Value) -> Result<()> {
        self.outbound
            .send(payload)
            .map_err(|_| BridgeError::transport("memory peer has been dropped"))
    }

    fn subscribe(&self) -> Result<InboundStream> {
        let mut inbound = self
            .inbound
            .lock()
            .map_err(|_| BridgeError::transport("memory transport lock poisoned"))?;
        inbound.take().ok_or_else(|| BridgeError::InvalidTransport {
            message: "inbound stream is already subscribed".to_string(),
        })
    }

    fn is_connected(&self) -> bool {
        !self.outbound.is_closed()
    }
}
