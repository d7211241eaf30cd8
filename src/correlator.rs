use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::errors::{DisconnectReason, WaError};
use crate::events::{Event, EventBus};
use json::JsonValue;

/// What a waiter resolves with: the inbound JSON reply, or the sealed bytes
/// of a binary reply (still needing the crypto envelope opened by the
/// caller, since the Correlator itself never holds the session keys).
#[derive(Debug, Clone)]
pub enum InboundPayload {
    Json(JsonValue),
    Binary(Vec<u8>),
}

struct PendingRequest {
    requires_phone: bool,
    resolver: oneshot::Sender<Result<InboundPayload, WaError>>,
}

/// Registry from tag to waiter. Per-request deadlines are not managed here:
/// the caller wraps the returned receiver in `tokio::time::timeout` and
/// calls `cancel` on elapse, keeping this struct a plain synchronous map
/// driven entirely from within the single actor task.
#[derive(Default)]
pub(crate) struct Correlator {
    waiters: HashMap<String, PendingRequest>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Correlator {
            waiters: HashMap::new(),
        }
    }

    pub(crate) fn register(
        &mut self,
        tag: String,
        requires_phone: bool,
    ) -> Result<oneshot::Receiver<Result<InboundPayload, WaError>>, WaError> {
        if self.waiters.contains_key(&tag) {
            return Err(WaError::DuplicateTag(tag));
        }
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(
            tag,
            PendingRequest {
                requires_phone,
                resolver: tx,
            },
        );
        Ok(rx)
    }

    /// Resolves the waiter for `tag`, if any. If no waiter is registered,
    /// publishes a `TAG:<tag>` event for late subscribers instead.
    pub(crate) fn deliver(&mut self, tag: &str, payload: InboundPayload, events: &EventBus) {
        match self.waiters.remove(tag) {
            Some(pending) => {
                let _ = pending.resolver.send(Ok(payload));
            }
            None => {
                events.publish(Event::Tag(tag.to_owned(), payload));
            }
        }
    }

    pub(crate) fn fail_all(&mut self, reason: DisconnectReason) {
        for (_, pending) in self.waiters.drain() {
            let _ = pending.resolver.send(Err(WaError::from(reason)));
        }
    }

    pub(crate) fn cancel(&mut self, tag: &str) {
        self.waiters.remove(tag);
    }

    pub(crate) fn any_requires_phone(&self) -> bool {
        self.waiters.values().any(|p| p.requires_phone)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}
