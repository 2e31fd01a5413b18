//! Handler types and the three handler registries.
//!
//! Event and call registries keep every listener in insertion order. The
//! command registry holds at most one handler per name.

use crate::error::{BridgeError, Result};
use crate::protocol::IpcEvent;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type EventFn = dyn Fn(&IpcEvent, &[Value]) + Send + Sync;
type CommandFn = dyn Fn(IpcEvent, Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync;

/// Listener for events and receiver for calls.
///
/// Runs synchronously on the dispatch task and is never awaited. Clones share
/// identity, which is what removal by handler matches on.
#[derive(Clone)]
pub struct EventHandler(Arc<EventFn>);

impl EventHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&IpcEvent, &[Value]) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Whether both handles refer to the same registered function.
    pub fn same_as(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }

    pub(crate) fn call(&self, event: &IpcEvent, args: &[Value]) {
        (self.0)(event, args)
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventHandler")
            .field(&Arc::as_ptr(&self.0))
            .finish()
    }
}

/// Handler answering a command.
///
/// An `Err` result is sent back as an error response carrying only its
/// display message.
#[derive(Clone)]
pub struct CommandHandler(Arc<CommandFn>);

impl CommandHandler {
    /// Wrap an async handler.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(IpcEvent, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self(Arc::new(move |event, args| f(event, args).boxed()))
    }

    /// Wrap a synchronous handler.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(IpcEvent, Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::new(move |event, args| futures::future::ready(f(event, args)))
    }

    pub fn same_as(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }

    pub(crate) fn call(&self, event: IpcEvent, args: Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> {
        (self.0)(event, args)
    }
}

impl fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CommandHandler")
            .field(&Arc::as_ptr(&self.0))
            .finish()
    }
}

/// Which listener registry an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListenerSet {
    Events,
    Calls,
}

#[derive(Clone)]
pub(crate) struct Listener<H> {
    /// Registry-unique entry id; duplicates of one handler get distinct ids.
    id: u64,
    handler: H,
    once: bool,
}

#[derive(Default)]
pub(crate) struct Registry {
    next_id: u64,
    events: HashMap<String, Vec<Listener<EventHandler>>>,
    calls: HashMap<String, Vec<Listener<EventHandler>>>,
    commands: HashMap<String, Listener<CommandHandler>>,
}

impl Registry {
    fn set(&self, set: ListenerSet) -> &HashMap<String, Vec<Listener<EventHandler>>> {
        match set {
            ListenerSet::Events => &self.events,
            ListenerSet::Calls => &self.calls,
        }
    }

    fn set_mut(&mut self, set: ListenerSet) -> &mut HashMap<String, Vec<Listener<EventHandler>>> {
        match set {
            ListenerSet::Events => &mut self.events,
            ListenerSet::Calls => &mut self.calls,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn add_listener(&mut self, set: ListenerSet, action: String, handler: EventHandler, once: bool) {
        let id = self.allocate_id();
        self.set_mut(set)
            .entry(action)
            .or_default()
            .push(Listener { id, handler, once });
    }

    /// Remove every listener for `action`, or only those matching `handler`.
    pub(crate) fn remove_listeners(&mut self, set: ListenerSet, action: &str, handler: Option<&EventHandler>) {
        let map = self.set_mut(set);
        match handler {
            None => {
                map.remove(action);
            }
            Some(handler) => {
                if let Some(listeners) = map.get_mut(action) {
                    listeners.retain(|l| !l.handler.same_as(handler));
                    if listeners.is_empty() {
                        map.remove(action);
                    }
                }
            }
        }
    }

    /// Entry ids registered for `action`, in dispatch order.
    pub(crate) fn listener_ids(&self, set: ListenerSet, action: &str) -> Vec<u64> {
        self.set(set)
            .get(action)
            .map(|listeners| listeners.iter().map(|l| l.id).collect())
            .unwrap_or_default()
    }

    /// Take the handler for entry `id` if it is still registered.
    ///
    /// A `once` entry is removed here, before its handler runs.
    pub(crate) fn claim_listener(&mut self, set: ListenerSet, action: &str, id: u64) -> Option<EventHandler> {
        let map = self.set_mut(set);
        let listeners = map.get_mut(action)?;
        let index = listeners.iter().position(|l| l.id == id)?;

        if !listeners[index].once {
            return Some(listeners[index].handler.clone());
        }

        let listener = listeners.remove(index);
        if listeners.is_empty() {
            map.remove(action);
        }
        Some(listener.handler)
    }

    pub(crate) fn listener_count(&self, set: ListenerSet, action: &str) -> usize {
        self.set(set).get(action).map_or(0, Vec::len)
    }

    /// Bind the handler for `action`. Never replaces an existing binding.
    pub(crate) fn add_command(&mut self, action: String, handler: CommandHandler, once: bool) -> Result<()> {
        if self.commands.contains_key(&action) {
            return Err(BridgeError::DuplicateHandler { action });
        }
        let id = self.allocate_id();
        self.commands.insert(action, Listener { id, handler, once });
        Ok(())
    }

    /// Unbind `action`; with a handler given, only if it is the bound one.
    pub(crate) fn remove_command(&mut self, action: &str, handler: Option<&CommandHandler>) {
        let matches = match (self.commands.get(action), handler) {
            (Some(_), None) => true,
            (Some(bound), Some(handler)) => bound.handler.same_as(handler),
            (None, _) => false,
        };
        if matches {
            self.commands.remove(action);
        }
    }

    /// Take the handler for `action`, unbinding it first if registered `once`.
    pub(crate) fn claim_command(&mut self, action: &str) -> Option<CommandHandler> {
        let bound = self.commands.get(action)?;
        if !bound.once {
            return Some(bound.handler.clone());
        }
        self.commands.remove(action).map(|l| l.handler)
    }

    pub(crate) fn has_command(&self, action: &str) -> bool {
        self.commands.contains_key(action)
    }

    pub(crate) fn clear(&mut self) {
        self.events.clear();
        self.calls.clear();
        self.commands.clear();
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.events.is_empty() && self.calls.is_empty() && self.commands.is_empty()
    }
}
