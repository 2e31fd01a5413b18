//! Framed JSON transport over async byte streams.
//!
//! Frame format: 4-byte big-endian length prefix followed by a UTF-8 JSON
//! payload of that length.
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! Used for stdio between a parent and a spawned child process, but any
//! `AsyncRead`/`AsyncWrite` pair works.

use super::{InboundStream, Transport};
use crate::config::StreamConfig;
use crate::error::{BridgeError, Result};
use serde_json::Value;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

fn check_frame_len(len: usize) -> Result<()> {
    if len <= StreamConfig::MAX_FRAME_SIZE {
        return Ok(());
    }
    Err(BridgeError::Validation {
        field: "frame".to_string(),
        message: format!(
            "{} byte frame is over the {} byte limit",
            len,
            StreamConfig::MAX_FRAME_SIZE
        ),
    })
}

/// Next envelope frame from `reader`, or `None` once the peer has hung up
/// between frames.
///
/// A stream that ends inside a frame is an error, not a hang-up.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; StreamConfig::FRAME_HEADER_LEN];
    if let Err(e) = reader.read_exact(&mut header).await {
        return match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Ok(None),
            _ => Err(e.into()),
        };
    }

    let len = u32::from_be_bytes(header) as usize;
    check_frame_len(len)?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Frame `body` onto `writer` and flush, so the peer sees whole envelopes.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    check_frame_len(body.len())?;

    let header = (body.len() as u32).to_be_bytes();
    writer.write_all(&header).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Transport over a reader/writer pair.
///
/// A writer task drains queued payloads in order, so `send` never blocks. The
/// writer finishes once every handle is dropped, closing the write side.
pub struct StreamTransport {
    outbound: mpsc::UnboundedSender<Value>,
    inbound: Mutex<Option<InboundStream>>,
    reader_task: JoinHandle<()>,
}

impl StreamTransport {
    /// Start reader and writer tasks on the current tokio runtime.
    pub fn new<R, W>(reader: R, writer: W) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| BridgeError::Runtime {
            message: e.to_string(),
        })?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        runtime.spawn(Self::write_loop(writer, outbound_rx));
        let reader_task = runtime.spawn(Self::read_loop(reader, inbound_tx));

        Ok(Self {
            outbound: outbound_tx,
            inbound: Mutex::new(Some(inbound_rx)),
            reader_task,
        })
    }

    /// Transport over this process's own stdin/stdout (the child side).
    ///
    /// Anything else written to stdout corrupts the stream; log to stderr.
    pub fn stdio() -> Result<Self> {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Spawn `command` with piped stdin/stdout and connect to it (the parent side).
    pub fn spawn_child(mut command: Command) -> Result<(Self, Child)> {
        command.stdin(Stdio::piped()).stdout(Stdio::piped());
        let mut child = command.spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| BridgeError::InvalidTransport {
            message: "child stdin is not piped".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| BridgeError::InvalidTransport {
            message: "child stdout is not piped".to_string(),
        })?;

        debug!("Spawned child process {:?}", child.id());
        Ok((Self::new(stdout, stdin)?, child))
    }

    async fn write_loop<W: AsyncWrite + Unpin>(mut writer: W, mut outbound: mpsc::UnboundedReceiver<Value>) {
        while let Some(value) = outbound.recv().await {
            let bytes = match serde_json::to_vec(&value) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("Failed to encode outbound frame: {}", e);
                    continue;
                }
            };
            if let Err(e) = write_frame(&mut writer, &bytes).await {
                error!("Stream transport write failed: {}", e);
                break;
            }
        }
        let _ = writer.shutdown().await;
        debug!("Stream transport writer finished");
    }

    async fn read_loop<R: AsyncRead + Unpin>(mut reader: R, inbound: mpsc::UnboundedSender<Value>) {
        loop {
            let frame = match read_frame(&mut reader).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("Stream transport reached EOF");
                    break;
                }
                Err(e) => {
                    error!("Stream transport read failed: {}", e);
                    break;
                }
            };

            match serde_json::from_slice::<Value>(&frame) {
                Ok(value) => {
                    if inbound.send(value).is_err() {
                        debug!("Inbound subscriber detached, stopping reader");
                        break;
                    }
                }
                Err(e) => debug!("Dropping non-JSON frame: {}", e),
            }
        }
    }
}

impl Transport for StreamTransport {
    fn send(&self, payload: Value) -> Result<()> {
        self.outbound
            .send(payload)
            .map_err(|_| BridgeError::transport("stream writer has stopped"))
    }

    fn subscribe(&self) -> Result<InboundStream> {
        let mut inbound = self
            .inbound
            .lock()
            .map_err(|_| BridgeError::transport("stream transport lock poisoned"))?;
        inbound.take().ok_or_else(|| BridgeError::InvalidTransport {
            message: "inbound stream is already subscribed".to_string(),
        })
    }

    fn is_connected(&self) -> bool {
        !self.outbound.is_closed()
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
