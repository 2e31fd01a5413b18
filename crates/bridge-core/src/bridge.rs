//! Dispatch and correlation engine.
//!
//! # Dispatch
//!
//! One pump task drains the transport's inbound stream in arrival order.
//! Responses settle pending invocations, events and calls run their
//! listeners inline, and commands run their handler on a separate task so a
//! slow handler never holds up the pump.
//!
//! # Locking
//!
//! Registries and the correlation table sit behind `std::sync::Mutex`. No
//! lock is held while user code runs, so handlers may register, remove, emit
//! or even destroy the bridge reentrantly.

use crate::builder::IpcBridgeBuilder;
use crate::correlation::{Correlations, PendingResponse};
use crate::error::{BridgeError, Result};
use crate::handler::{CommandHandler, EventHandler, ListenerSet, Registry};
use crate::protocol::{self, Envelope, HandlerKind, IpcEvent, Kind, Payload};
use crate::transport::{DestroyedTransport, InboundStream, Transport};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Typed events, calls and commands over one transport.
///
/// Cheap to clone; clones share the same registries and lifecycle.
#[derive(Clone)]
pub struct IpcBridge {
    inner: Arc<Inner>,
}

struct Inner {
    origin_id: u32,
    runtime: Handle,
    transport: RwLock<Arc<dyn Transport>>,
    registry: Mutex<Registry>,
    correlations: Correlations,
    destroyed: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl IpcBridge {
    /// Create a bridge with default settings.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(transport: impl Transport) -> Result<Self> {
        Self::builder(transport).build()
    }

    /// Create a builder for configuring the bridge.
    pub fn builder(transport: impl Transport) -> IpcBridgeBuilder {
        IpcBridgeBuilder::new(transport)
    }

    pub(crate) fn start(
        transport: Arc<dyn Transport>,
        response_timeout: Duration,
        origin_id: u32,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| BridgeError::Runtime {
            message: e.to_string(),
        })?;

        if !transport.is_connected() {
            return Err(BridgeError::InvalidTransport {
                message: "transport cannot send".to_string(),
            });
        }
        let inbound = transport.subscribe().map_err(|e| match e {
            BridgeError::InvalidTransport { .. } => e,
            other => BridgeError::InvalidTransport {
                message: other.to_string(),
            },
        })?;

        let inner = Arc::new(Inner {
            origin_id,
            runtime: runtime.clone(),
            transport: RwLock::new(transport),
            registry: Mutex::new(Registry::default()),
            correlations: Correlations::new(response_timeout, runtime.clone()),
            destroyed: AtomicBool::new(false),
            pump: Mutex::new(None),
        });

        let pump = runtime.spawn(Inner::pump(Arc::downgrade(&inner), inbound));
        *lock(&inner.pump) = Some(pump);

        debug!(
            "IPC bridge started (origin {}, response timeout {:?})",
            origin_id, response_timeout
        );
        Ok(Self { inner })
    }

    // ========================================
    // Emission
    // ========================================

    /// Send a fire-and-forget event.
    pub fn send(&self, action: &str, args: Vec<Value>) -> Result<()> {
        self.inner.emit(HandlerKind::Event, action, args).map(|_| ())
    }

    /// Send a one-way call to the peer's receivers.
    pub fn call(&self, action: &str, args: Vec<Value>) -> Result<()> {
        self.inner.emit(HandlerKind::Call, action, args).map(|_| ())
    }

    /// Invoke a command on the peer and get a deferred result.
    ///
    /// Fails immediately only if the bridge is destroyed. Every other failure,
    /// including a failed write, is delivered through the returned future.
    pub fn invoke(&self, action: &str, args: Vec<Value>) -> Result<PendingResponse> {
        self.inner.invoke(action, args)
    }

    /// Invoke a command and deserialize its result.
    pub async fn invoke_as<T: DeserializeOwned>(&self, action: &str, args: Vec<Value>) -> Result<T> {
        let value = self.invoke(action, args)?.await?;
        Ok(serde_json::from_value(value)?)
    }

    // ========================================
    // Events
    // ========================================

    pub fn on(&self, action: impl Into<String>, handler: EventHandler) -> Result<()> {
        self.inner.add_listener(ListenerSet::Events, action.into(), handler, false)
    }

    pub fn once(&self, action: impl Into<String>, handler: EventHandler) -> Result<()> {
        self.inner.add_listener(ListenerSet::Events, action.into(), handler, true)
    }

    /// Remove event listeners: all of them for `action`, or just `handler`.
    pub fn remove_listener(&self, action: &str, handler: Option<&EventHandler>) -> Result<()> {
        self.inner.remove_listeners(ListenerSet::Events, action, handler)
    }

    // ========================================
    // Calls
    // ========================================

    pub fn receive(&self, action: impl Into<String>, handler: EventHandler) -> Result<()> {
        self.inner.add_listener(ListenerSet::Calls, action.into(), handler, false)
    }

    pub fn receive_once(&self, action: impl Into<String>, handler: EventHandler) -> Result<()> {
        self.inner.add_listener(ListenerSet::Calls, action.into(), handler, true)
    }

    /// Remove call receivers: all of them for `action`, or just `handler`.
    pub fn remove_receiver(&self, action: &str, handler: Option<&EventHandler>) -> Result<()> {
        self.inner.remove_listeners(ListenerSet::Calls, action, handler)
    }

    // ========================================
    // Commands
    // ========================================

    /// Bind the handler for a command.
    ///
    /// Fails with [`BridgeError::DuplicateHandler`] while another handler is
    /// bound to the same name.
    pub fn handle(&self, action: impl Into<String>, handler: CommandHandler) -> Result<()> {
        self.inner.add_command(action.into(), handler, false)
    }

    /// Bind a handler that answers a single invocation.
    pub fn handle_once(&self, action: impl Into<String>, handler: CommandHandler) -> Result<()> {
        self.inner.add_command(action.into(), handler, true)
    }

    /// Unbind a command handler. Unknown names are ignored.
    pub fn remove_handler(&self, action: &str, handler: Option<&CommandHandler>) -> Result<()> {
        self.inner.ensure_active()?;
        lock(&self.inner.registry).remove_command(action, handler);
        Ok(())
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Clear all listeners, receivers and handlers. The bridge stays usable.
    pub fn remove_all(&self) -> Result<()> {
        self.inner.ensure_active()?;
        lock(&self.inner.registry).clear();
        debug!("Cleared all IPC handlers");
        Ok(())
    }

    /// Tear the bridge down for good.
    ///
    /// Clears every registry, rejects pending invocations with
    /// [`BridgeError::InstanceDestroyed`], detaches from the inbound stream and
    /// swaps in a transport whose sends always fail.
    pub fn destroy(&self) -> Result<()> {
        self.inner.destroy()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    // ========================================
    // Introspection
    // ========================================

    /// Process id stamped on outgoing envelopes.
    pub fn origin_id(&self) -> u32 {
        self.inner.origin_id
    }

    pub fn response_timeout(&self) -> Duration {
        self.inner.correlations.timeout()
    }

    /// Number of invocations still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.correlations.len()
    }

    pub fn listener_count(&self, action: &str) -> usize {
        lock(&self.inner.registry).listener_count(ListenerSet::Events, action)
    }

    pub fn receiver_count(&self, action: &str) -> usize {
        lock(&self.inner.registry).listener_count(ListenerSet::Calls, action)
    }

    pub fn has_handler(&self, action: &str) -> bool {
        lock(&self.inner.registry).has_command(action)
    }
}

impl std::fmt::Debug for IpcBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcBridge")
            .field("origin_id", &self.inner.origin_id)
            .field("destroyed", &self.is_destroyed())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Inner {
    fn ensure_active(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            Err(BridgeError::InstanceDestroyed)
        } else {
            Ok(())
        }
    }

    fn transport(&self) -> Arc<dyn Transport> {
        self.transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn add_listener(&self, set: ListenerSet, action: String, handler: EventHandler, once: bool) -> Result<()> {
        self.ensure_active()?;
        lock(&self.registry).add_listener(set, action, handler, once);
        Ok(())
    }

    fn remove_listeners(&self, set: ListenerSet, action: &str, handler: Option<&EventHandler>) -> Result<()> {
        self.ensure_active()?;
        lock(&self.registry).remove_listeners(set, action, handler);
        Ok(())
    }

    fn add_command(&self, action: String, handler: CommandHandler, once: bool) -> Result<()> {
        self.ensure_active()?;
        lock(&self.registry).add_command(action, handler, once)
    }

    /// Build and write an event, call or command envelope. Returns its id.
    fn emit(&self, kind: HandlerKind, action: &str, args: Vec<Value>) -> Result<String> {
        self.ensure_active()?;
        let envelope = Envelope::build(kind, action, args, self.origin_id);
        self.transport().send(envelope.to_value()?)?;
        trace!("Sent {} '{}' ({})", envelope.kind, action, envelope.message_id);
        Ok(envelope.message_id)
    }

    fn invoke(&self, action: &str, args: Vec<Value>) -> Result<PendingResponse> {
        self.ensure_active()?;
        let envelope = Envelope::build(HandlerKind::Command, action, args, self.origin_id);
        let pending = self.correlations.register(&envelope.message_id, action);

        let sent = envelope
            .to_value()
            .and_then(|value| self.transport().send(value));
        match sent {
            Ok(()) => trace!("Invoked command '{}' ({})", action, envelope.message_id),
            Err(e) => {
                debug!("Failed to send command '{}': {}", action, e);
                self.correlations.settle(&envelope.message_id, Err(e));
            }
        }
        Ok(pending)
    }

    async fn pump(inner: Weak<Inner>, mut inbound: InboundStream) {
        while let Some(raw) = inbound.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.dispatch(raw);
        }
        debug!("IPC bridge inbound stream closed");
    }

    /// Route one inbound value. Foreign or malformed traffic is skipped.
    fn dispatch(self: &Arc<Self>, raw: Value) {
        let envelope = match protocol::validate(&raw) {
            Ok(envelope) => envelope,
            Err(rejection) => {
                trace!("Ignoring inbound message: {}", rejection);
                return;
            }
        };
        if self.ensure_active().is_err() {
            return;
        }

        let Envelope {
            message_id,
            origin_id,
            kind,
            action_name,
            payload,
        } = envelope;
        let action = action_name.unwrap_or_default();

        match (kind, payload) {
            (Kind::Response, Payload::Success { response }) => {
                self.settle_response(&message_id, Ok(response))
            }
            (Kind::Response, Payload::Failure { error }) => self.settle_response(
                &message_id,
                Err(BridgeError::RemoteHandler {
                    message: error.message,
                }),
            ),
            (Kind::Event, Payload::Args(args)) => {
                let event = IpcEvent::new(message_id, origin_id, action, HandlerKind::Event);
                self.notify(ListenerSet::Events, &event, &args);
            }
            (Kind::Call, Payload::Args(args)) => {
                let event = IpcEvent::new(message_id, origin_id, action, HandlerKind::Call);
                self.notify(ListenerSet::Calls, &event, &args);
            }
            (Kind::Command, Payload::Args(args)) => {
                let event = IpcEvent::new(message_id, origin_id, action, HandlerKind::Command);
                self.run_command(event, args);
            }
            (kind, payload) => warn!(
                "Dropping {} {} with mismatched payload {:?}",
                kind, message_id, payload
            ),
        }
    }

    fn settle_response(&self, message_id: &str, result: Result<Value>) {
        if !self.correlations.settle(message_id, result) {
            trace!("Ignoring response {} with no pending command", message_id);
        }
    }

    /// Run listeners in registration order.
    ///
    /// Each entry is re-checked just before it runs, so removals made by an
    /// earlier listener (or by a `once` claim) apply immediately.
    fn notify(&self, set: ListenerSet, event: &IpcEvent, args: &[Value]) {
        let ids = lock(&self.registry).listener_ids(set, event.action_name());
        if ids.is_empty() {
            trace!("No listeners for {:?} '{}'", event.kind(), event.action_name());
            return;
        }

        for id in ids {
            let Some(handler) = lock(&self.registry).claim_listener(set, event.action_name(), id) else {
                continue;
            };
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler.call(event, args)));
            if outcome.is_err() {
                error!(
                    "Listener for {:?} '{}' panicked",
                    event.kind(),
                    event.action_name()
                );
            }
        }
    }

    /// Execute the bound handler and answer with exactly one response.
    ///
    /// With no handler bound nothing is sent; the invoker times out.
    fn run_command(self: &Arc<Self>, event: IpcEvent, args: Vec<Value>) {
        let Some(handler) = lock(&self.registry).claim_command(event.action_name()) else {
            debug!("No handler for command '{}'", event.action_name());
            return;
        };

        let inner = Arc::clone(self);
        let message_id = event.message_id().to_string();
        let action = event.action_name().to_string();

        self.runtime.spawn(async move {
            let run = async move { handler.call(event, args).await };
            let result = match AssertUnwindSafe(run).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => {
                    error!("Handler for command '{}' panicked", action);
                    Err(format!("Handler for command '{}' panicked", action))
                }
            };
            inner.respond(&message_id, &action, result);
        });
    }

    fn respond(&self, message_id: &str, action: &str, result: std::result::Result<Value, String>) {
        let envelope = Envelope::response(message_id, self.origin_id, result);
        let sent = envelope
            .to_value()
            .and_then(|value| self.transport().send(value));
        match sent {
            Ok(()) => trace!("Answered command '{}' ({})", action, message_id),
            Err(BridgeError::InstanceDestroyed) => {
                debug!("Dropping response for '{}': bridge destroyed", action)
            }
            Err(e) => warn!("Failed to send response for command '{}': {}", action, e),
        }
    }

    fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::InstanceDestroyed);
        }

        lock(&self.registry).clear();

        let rejected = self
            .correlations
            .reject_all(|| BridgeError::InstanceDestroyed);

        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }

        *self.transport.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(DestroyedTransport);

        debug!("IPC bridge destroyed ({} pending invocations rejected)", rejected);
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let pump = self.pump.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(pump) = pump.take() {
            pump.abort();
        }
    }
}
