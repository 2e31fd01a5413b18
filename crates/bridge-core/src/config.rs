//! Centralized configuration for ipc-bridge.
//!
//! Protocol constants, engine defaults and framing limits.

use std::time::Duration;

/// Envelope protocol constants.
pub struct ProtocolConfig;

impl ProtocolConfig {
    /// Prefix of every message id; traffic without it is ignored.
    pub const MESSAGE_ID_PREFIX: &'static str = "ipcbridge";
    pub const MESSAGE_ID_SEPARATOR: char = '_';
}

/// Dispatch and correlation engine defaults.
pub struct BridgeConfig;

impl BridgeConfig {
    pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(5000);

    /// Resolve a caller-supplied timeout in milliseconds.
    ///
    /// Missing or non-positive values fall back to [`Self::DEFAULT_RESPONSE_TIMEOUT`].
    pub fn response_timeout_from_ms(ms: Option<i64>) -> Duration {
        match ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms as u64),
            _ => Self::DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

/// Framed stream transport limits.
pub struct StreamConfig;

impl StreamConfig {
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const FRAME_HEADER_LEN: usize = 4;
}
