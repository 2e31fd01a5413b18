//! Transports the bridge can run over.
//!
//! A transport is the raw channel: it sends JSON values and exposes one
//! inbound stream. It knows nothing about envelopes.
//!
//! - [`MemoryTransport`]: linked in-process pair, mostly for tests and embedding
//! - [`StreamTransport`]: length-prefixed JSON frames over byte streams
//!   (stdio, child process pipes)

pub mod memory;
pub mod stream;

pub use memory::MemoryTransport;
pub use stream::{read_frame, write_frame, StreamTransport};

use crate::error::{BridgeError, Result};
use serde_json::Value;
use tokio::sync::mpsc;

/// Inbound half of a transport. Dropping it detaches the subscriber.
pub type InboundStream = mpsc::UnboundedReceiver<Value>;

/// A bidirectional message channel between two processes.
pub trait Transport: Send + Sync + 'static {
    /// Write one payload to the peer.
    fn send(&self, payload: Value) -> Result<()>;

    /// Take the inbound stream. A transport hands it out at most once.
    fn subscribe(&self) -> Result<InboundStream>;

    /// Whether `send` can currently reach the peer.
    fn is_connected(&self) -> bool {
        true
    }
}

/// Stand-in installed by `destroy`; every send fails.
pub(crate) struct DestroyedTransport;

impl Transport for DestroyedTransport {
    fn send(&self, _payload: Value) -> Result<()> {
        Err(BridgeError::InstanceDestroyed)
    }

    fn subscribe(&self) -> Result<InboundStream> {
        Err(BridgeError::InstanceDestroyed)
    }

    fn is_connected(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destroyed_transport_always_fails() {
        let transport = DestroyedTransport;
        assert!(transport
            .send(serde_json::json!({}))
            .unwrap_err()
            .is_destroyed());
        assert!(transport.subscribe().is_err());
        assert!(!transport.is_connected());
    }
}
