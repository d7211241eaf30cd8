use std::sync::{Arc, Mutex};

use crate::correlator::InboundPayload;
use crate::errors::DisconnectReason;

#[derive(Clone)]
pub enum Event {
    Open,
    Close {
        reason: DisconnectReason,
        is_reconnecting: bool,
    },
    WsClose {
        reason: DisconnectReason,
    },
    PhoneChange {
        connected: bool,
    },
    Tag(String, InboundPayload),
}

pub(crate) type Subscriber = Arc<Mutex<dyn FnMut(&Event) + Send>>;

/// Topic-based synchronous pub/sub, dispatched in subscription order.
/// Subscribers may unsubscribe mid-dispatch; the dispatch snapshots the
/// subscriber list before iterating so later handlers still run regardless.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<(u64, Subscriber)>>>,
    next_id: Arc<Mutex<u64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

impl EventBus {
    pub(crate) fn new() -> Self {
        EventBus {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(0)),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: FnMut(&Event) + Send + 'static,
    {
        let mut next_id = self.next_id.lock().expect("event bus id lock poisoned");
        let id = *next_id;
        *next_id += 1;
        drop(next_id);

        self.subscribers
            .lock()
            .expect("event bus subscriber lock poisoned")
            .push((id, Arc::new(Mutex::new(handler))));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .expect("event bus subscriber lock poisoned")
            .retain(|(existing, _)| *existing != id.0);
    }

    pub(crate) fn publish(&self, event: Event) {
        let snapshot: Vec<Subscriber> = self
            .subscribers
            .lock()
            .expect("event bus subscriber lock poisoned")
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in snapshot {
            (handler.lock().expect("event bus handler lock poisoned"))(&event);
        }
    }
}
