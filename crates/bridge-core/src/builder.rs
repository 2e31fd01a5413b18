//! Builder for configuring IpcBridge initialization.

use std::sync::Arc;
use std::time::Duration;

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::transport::Transport;
use crate::IpcBridge;

/// Builder for configuring IpcBridge initialization.
///
/// # Example
///
/// ```rust,ignore
/// use ipc_bridge::{IpcBridge, StreamTransport};
///
/// let bridge = IpcBridge::builder(StreamTransport::stdio()?)
///     .response_timeout_ms(2_000)
///     .build()?;
/// ```
pub struct IpcBridgeBuilder {
    transport: Arc<dyn Transport>,
    response_timeout: Duration,
    origin_id: u32,
}

impl IpcBridgeBuilder {
    /// Create a new builder around a transport.
    pub fn new(transport: impl Transport) -> Self {
        Self {
            transport: Arc::new(transport),
            response_timeout: BridgeConfig::DEFAULT_RESPONSE_TIMEOUT,
            origin_id: std::process::id(),
        }
    }

    /// How long `invoke` waits for a response, in milliseconds.
    ///
    /// Non-positive values select the default.
    ///
    /// Default: 5000 ms
    pub fn response_timeout_ms(mut self, ms: i64) -> Self {
        self.response_timeout = BridgeConfig::response_timeout_from_ms(Some(ms));
        self
    }

    /// How long `invoke` waits for a response. Zero selects the default.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = if timeout.is_zero() {
            BridgeConfig::DEFAULT_RESPONSE_TIMEOUT
        } else {
            timeout
        };
        self
    }

    /// Override the origin id stamped on outgoing envelopes.
    ///
    /// Default: the current process id
    pub fn origin_id(mut self, origin_id: u32) -> Self {
        self.origin_id = origin_id;
        self
    }

    /// Subscribe to the transport and start dispatching.
    pub fn build(self) -> Result<IpcBridge> {
        IpcBridge::start(self.transport, self.response_timeout, self.origin_id)
    }
}
