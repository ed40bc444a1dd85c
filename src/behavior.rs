//! Behaviors and the behavior stack.
//!
//! A [`Behavior`] is a partial function from messages to actions. The top
//! of an actor's [`BehaviorStack`] is the active handler; `do_become`
//! either replaces it (discard) or pushes on top of it (keep).
//!
//! Behaviors are handles: the callable state sits behind an `Arc`, so an
//! executing behavior stays alive even when the handler it is running
//! replaces or pops it from the stack mid-dispatch.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::actor::LocalActor;
use crate::message::Message;

/// Outcome of offering a message to a behavior.
#[derive(Debug)]
pub enum Handled {
    /// The message was consumed.
    Done,
    /// The message was consumed; reply to the sender. For a request this
    /// becomes the correlated response, for an async message a plain
    /// send.
    Reply(Message),
    /// The behavior does not match this message; the element is cached
    /// and retried after the next behavior change.
    Skipped,
}

type HandlerFn = dyn FnMut(&mut LocalActor<'_>, &Message) -> Handled + Send;
type TimeoutFn = dyn FnMut(&mut LocalActor<'_>) + Send;

#[derive(Clone)]
struct TimeoutClause {
    after: Duration,
    handler: Arc<Mutex<TimeoutFn>>,
}

/// A message handler, optionally with a timeout clause.
#[derive(Clone)]
pub struct Behavior {
    handler: Arc<Mutex<HandlerFn>>,
    timeout: Option<TimeoutClause>,
}

impl Behavior {
    /// Wrap a handler function.
    pub fn new<F>(handler: F) -> Self
    where
        F: FnMut(&mut LocalActor<'_>, &Message) -> Handled + Send + 'static,
    {
        Self {
            handler: Arc::new(Mutex::new(handler)),
            timeout: None,
        }
    }

    /// Wrap a handler with a timeout clause: when the actor idles on
    /// this behavior for `after`, `on_timeout` runs instead of a
    /// message handler.
    pub fn with_timeout<F, G>(handler: F, after: Duration, on_timeout: G) -> Self
    where
        F: FnMut(&mut LocalActor<'_>, &Message) -> Handled + Send + 'static,
        G: FnMut(&mut LocalActor<'_>) + Send + 'static,
    {
        Self {
            handler: Arc::new(Mutex::new(handler)),
            timeout: Some(TimeoutClause {
                after,
                handler: Arc::new(Mutex::new(on_timeout)),
            }),
        }
    }

    /// Offer a message to this behavior.
    pub(crate) fn invoke(&self, actor: &mut LocalActor<'_>, msg: &Message) -> Handled {
        let mut handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        (&mut *handler)(actor, msg)
    }

    /// The timeout duration, if this behavior has a timeout clause.
    pub(crate) fn timeout_after(&self) -> Option<Duration> {
        self.timeout.as_ref().map(|t| t.after)
    }

    /// Run the timeout clause, if any.
    pub(crate) fn handle_timeout(&self, actor: &mut LocalActor<'_>) {
        if let Some(clause) = &self.timeout {
            let mut handler = clause
                .handler
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            (&mut *handler)(actor);
        }
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior")
            .field("timeout", &self.timeout_after())
            .finish_non_exhaustive()
    }
}

// ── Behavior stack ──────────────────────────────────────────────────────

/// LIFO stack of behaviors; the last element is the active handler.
///
/// An empty stack together with empty pending responses means the actor
/// is quiescent and finalizes.
#[derive(Debug, Default)]
pub(crate) struct BehaviorStack {
    elements: Vec<Behavior>,
}

impl BehaviorStack {
    pub(crate) fn push(&mut self, bhvr: Behavior) {
        self.elements.push(bhvr);
    }

    /// Remove the active behavior; the previous one takes over.
    pub(crate) fn pop(&mut self) -> Option<Behavior> {
        self.elements.pop()
    }

    /// Replace the active behavior (discard semantics). Pushes when the
    /// stack is empty.
    pub(crate) fn replace_top(&mut self, bhvr: Behavior) {
        self.elements.pop();
        self.elements.push(bhvr);
    }

    pub(crate) fn top(&self) -> Option<&Behavior> {
        self.elements.last()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.elements.len()
    }

    pub(crate) fn clear(&mut self) {
        self.elements.clear();
    }
}
