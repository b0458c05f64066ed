//! Local subscribers for events the peer triggers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned by [`Connector::on`](super::Connector::on), used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// An event delivered by the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerEvent {
    /// Event name.
    pub name: String,
    /// JSON argument.
    pub data: Value,
    /// Binary payload, if the peer attached one.
    pub payload: Option<Bytes>,
}

impl PeerEvent {
    /// Deserialize the event data.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.data)?)
    }
}

/// Subscriber callback.
pub type EventCallback = Arc<dyn Fn(&PeerEvent) + Send + Sync>;

/// Subscribers grouped by event name, in subscription order.
#[derive(Default)]
pub(crate) struct Subscribers {
    by_event: HashMap<String, Vec<(SubscriptionId, EventCallback)>>,
}

impl Subscribers {
    pub(crate) fn add(&mut self, event: &str, callback: EventCallback) -> SubscriptionId {
        let id = SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed));
        self.by_event
            .entry(event.to_string())
            .or_default()
            .push((id, callback));
        id
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        for list in self.by_event.values_mut() {
            if let Some(pos) = list.iter().position(|(sub, _)| *sub == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Callbacks for `event`, cloned so they can run without the lock.
    pub(crate) fn listeners(&self, event: &str) -> Vec<EventCallback> {
        self.by_event
            .get(event)
            .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default()
    }
}
