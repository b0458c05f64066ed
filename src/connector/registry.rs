//! Connector registry: named connectors and frames parked for connectors
//! that do not exist yet.
//!
//! Registration and parking share one lock so a frame is either parked
//! before the connector appears (and replayed by [`ConnectorRegistry::register`])
//! or dispatched to the registered connector. Never both.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use super::events::{EventCallback, PeerEvent, SubscriptionId, Subscribers};
use super::handler::{Handler, HandlerTable};
use crate::error::{ConnectorError, Result};
use crate::protocol::Envelope;
use crate::writer::WriterHandle;

/// Local state of one registered connector.
pub(crate) struct ConnectorEntry {
    name: String,
    handlers: HandlerTable,
    subscribers: Mutex<Subscribers>,
}

impl ConnectorEntry {
    fn new(name: &str, handlers: HandlerTable) -> Self {
        Self {
            name: name.to_string(),
            handlers,
            subscribers: Mutex::new(Subscribers::default()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Find the handler for `function`.
    pub(crate) fn handler(&self, function: &str) -> Result<Arc<dyn Handler>> {
        self.handlers
            .get(function)
            .ok_or_else(|| ConnectorError::NoSuchFn {
                connector: self.name.clone(),
                function: function.to_string(),
            })
    }

    pub(crate) fn subscribe(&self, event: &str, callback: EventCallback) -> SubscriptionId {
        self.subscribers.lock().add(event, callback)
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.lock().remove(id)
    }

    /// Notify every subscriber of `event.name`, in subscription order.
    ///
    /// A panicking subscriber is logged and does not stop the others.
    pub(crate) fn emit(&self, event: &PeerEvent) {
        let listeners = self.subscribers.lock().listeners(&event.name);
        if listeners.is_empty() {
            tracing::debug!("no listeners for event {}::{}", self.name, event.name);
        }
        for listener in listeners {
            if std::panic::catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::error!(
                    "event listener for {}::{} panicked",
                    self.name,
                    event.name
                );
            }
        }
    }
}

/// An inbound `exec` or `event` held until its connector is created.
#[derive(Debug)]
pub(crate) struct ParkedFrame {
    /// Socket the frame arrived on (replies go back there).
    pub origin: WriterHandle,
    pub envelope: Envelope,
    pub payload: Option<Bytes>,
}

/// Result of [`ConnectorRegistry::park`].
pub(crate) enum ParkOutcome {
    /// Connector exists; dispatch the frame now.
    Registered(Arc<ConnectorEntry>, ParkedFrame),
    /// Frame parked. `first` is set when this started a new park queue.
    Parked { first: bool },
    /// Park queue is full; the frame is handed back.
    Overflow(ParkedFrame),
}

/// Table of named connectors.
#[derive(Default)]
pub(crate) struct ConnectorRegistry {
    entries: HashMap<String, Arc<ConnectorEntry>>,
    parked: HashMap<String, Vec<ParkedFrame>>,
}

impl ConnectorRegistry {
    /// Register `name`, returning the entry and any frames parked for it.
    ///
    /// # Errors
    ///
    /// [`ConnectorError::DuplicateConnector`] if the name is taken.
    pub(crate) fn register(
        &mut self,
        name: &str,
        handlers: HandlerTable,
    ) -> Result<(Arc<ConnectorEntry>, Vec<ParkedFrame>)> {
        if self.entries.contains_key(name) {
            return Err(ConnectorError::DuplicateConnector(name.to_string()));
        }
        let entry = Arc::new(ConnectorEntry::new(name, handlers));
        self.entries.insert(name.to_string(), entry.clone());
        let parked = self.parked.remove(name).unwrap_or_default();
        Ok((entry, parked))
    }

    /// Find the connector called `name`.
    pub(crate) fn lookup(&self, name: &str) -> Result<Arc<ConnectorEntry>> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| ConnectorError::NoSuchConnector(name.to_string()))
    }

    /// Park `frame` for `name` unless the connector already exists.
    pub(crate) fn park(&mut self, name: &str, frame: ParkedFrame, limit: usize) -> ParkOutcome {
        if let Some(entry) = self.entries.get(name) {
            return ParkOutcome::Registered(entry.clone(), frame);
        }
        let queue = self.parked.entry(name.to_string()).or_default();
        if queue.len() >= limit {
            return ParkOutcome::Overflow(frame);
        }
        let first = queue.is_empty();
        queue.push(frame);
        ParkOutcome::Parked { first }
    }

    /// Remove and return everything parked for `name`.
    pub(crate) fn expire(&mut self, name: &str) -> Vec<ParkedFrame> {
        self.parked.remove(name).unwrap_or_default()
    }

    /// Number of frames parked for `name`.
    #[cfg(test)]
    pub(crate) fn parked_len(&self, name: &str) -> usize {
        self.parked.get(name).map_or(0, Vec::len)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}
