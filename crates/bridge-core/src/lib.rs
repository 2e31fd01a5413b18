//! ipc-bridge - typed events, calls and commands over a process channel.
//!
//! Two processes share one bidirectional transport. On top of it this crate
//! multiplexes three interaction patterns:
//!
//! - **Events** (`send` → `on`/`once`): fire-and-forget notifications
//! - **Calls** (`call` → `receive`/`receive_once`): one-way directives
//! - **Commands** (`invoke` → `handle`/`handle_once`): request/response with
//!   a timeout, at most one handler per command name
//!
//! # Example
//!
//! ```rust,ignore
//! use ipc_bridge::{CommandHandler, EventHandler, IpcBridge, MemoryTransport};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> ipc_bridge::Result<()> {
//!     let (left, right) = MemoryTransport::pair();
//!     let parent = IpcBridge::new(left)?;
//!     let child = IpcBridge::new(right)?;
//!
//!     child.handle("add", CommandHandler::from_fn(|_, args| {
//!         let sum: i64 = args.iter().filter_map(|v| v.as_i64()).sum();
//!         Ok(json!(sum))
//!     }))?;
//!     parent.on("ready", EventHandler::new(|event, _| {
//!         println!("child {} is ready", event.origin_id());
//!     }))?;
//!
//!     let sum: i64 = parent.invoke_as("add", vec![json!(2), json!(3)]).await?;
//!     assert_eq!(sum, 5);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;

mod bridge;
mod builder;
mod correlation;
mod handler;

pub use bridge::IpcBridge;
pub use builder::IpcBridgeBuilder;
pub use correlation::PendingResponse;
pub use error::{BridgeError, Result};
pub use handler::{CommandHandler, EventHandler};
pub use protocol::{Envelope, HandlerKind, IpcEvent, Kind, Payload, Rejection};
pub use transport::{InboundStream, MemoryTransport, StreamTransport, Transport};
