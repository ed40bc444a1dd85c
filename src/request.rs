//! Request/response correlation.
//!
//! `sync_send` allocates a fresh request id and returns a [`RequestId`]
//! carrying the matching response id. Attaching a handler with
//! `await_response` records it at the front of [`PendingResponses`];
//! only the front entry is dispatchable, so responses that arrive out of
//! order sit in the actor's cache until their handler reaches the front.
//!
//! A [`ResponsePromise`] defers the reply to a request past the end of
//! the handler that received it.

use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;

use crate::addr::ActorAddr;
use crate::behavior::Behavior;
use crate::mailbox::Envelope;
use crate::message::Message;
use crate::message_id::MessageId;

// ── Request id ──────────────────────────────────────────────────────────

/// Correlation handle returned by `sync_send` / `timed_sync_send`.
///
/// Holds the *response* id the destination will echo back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub(crate) MessageId);

impl RequestId {
    /// The response id awaited for this request.
    #[must_use]
    pub fn response_id(self) -> MessageId {
        self.0
    }
}

// ── Pending responses ───────────────────────────────────────────────────

/// Outstanding response handlers, most recently awaited first.
#[derive(Default)]
pub(crate) struct PendingResponses {
    entries: VecDeque<(MessageId, Behavior)>,
}

impl PendingResponses {
    /// Record a handler as the new front.
    pub(crate) fn push_front(&mut self, response_id: MessageId, handler: Behavior) {
        self.entries.push_front((response_id, handler));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The id a response must carry to be dispatchable right now.
    pub(crate) fn front_id(&self) -> Option<MessageId> {
        self.entries.front().map(|(mid, _)| *mid)
    }

    /// The handler for the front entry.
    pub(crate) fn front_handler(&self) -> Option<Behavior> {
        self.entries.front().map(|(_, bhvr)| bhvr.clone())
    }

    /// Remove and return the front entry's handler.
    pub(crate) fn pop_front(&mut self) -> Option<Behavior> {
        self.entries.pop_front().map(|(_, bhvr)| bhvr)
    }

    /// `true` when a handler is registered for `response_id` anywhere in
    /// the sequence.
    pub(crate) fn awaits(&self, response_id: MessageId) -> bool {
        self.entries.iter().any(|(mid, _)| *mid == response_id)
    }

    /// Remove the handler registered for `response_id`, wherever it is.
    pub(crate) fn remove(&mut self, response_id: MessageId) -> Option<Behavior> {
        let index = self
            .entries
            .iter()
            .position(|(mid, _)| *mid == response_id)?;
        self.entries.remove(index).map(|(_, bhvr)| bhvr)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Debug for PendingResponses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResponses")
            .field("len", &self.entries.len())
            .field("front", &self.front_id())
            .finish()
    }
}

// ── Response promises ───────────────────────────────────────────────────

/// Deferred reply handle for the request currently being processed.
///
/// Created via `make_response_promise` inside a handler; delivering it
/// later sends the correlated response. A promise made outside a request
/// dispatch is inert: [`pending`](Self::pending) is `false` and
/// [`deliver`](Self::deliver) drops the message.
#[derive(Debug, Clone)]
pub struct ResponsePromise {
    from: Option<ActorAddr>,
    to: Option<ActorAddr>,
    response_id: MessageId,
}

impl ResponsePromise {
    pub(crate) fn new(from: ActorAddr, to: ActorAddr, response_id: MessageId) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            response_id,
        }
    }

    pub(crate) fn inert() -> Self {
        Self {
            from: None,
            to: None,
            response_id: MessageId::default(),
        }
    }

    /// `true` while the promise has a receiver to answer.
    #[must_use]
    pub fn pending(&self) -> bool {
        self.to.is_some()
    }

    /// Complete the request with `msg`.
    pub fn deliver(self, msg: Message) {
        if let Some(to) = self.to {
            to.deliver(Envelope::user(self.from, self.response_id, msg));
        }
    }
}

/// Typed façade over [`ResponsePromise`] delivering a single value.
#[derive(Debug, Clone)]
pub struct TypedResponsePromise<T> {
    inner: ResponsePromise,
    _marker: PhantomData<fn(T)>,
}

impl<T: Send + Sync + 'static> TypedResponsePromise<T> {
    pub(crate) fn new(inner: ResponsePromise) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// `true` while the promise has a receiver to answer.
    #[must_use]
    pub fn pending(&self) -> bool {
        self.inner.pending()
    }

    /// Complete the request with a single-element message.
    pub fn deliver(self, value: T) {
        self.inner.deliver(crate::message![value]);
    }
}
