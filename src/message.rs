//! Immutable, shareable message tuples.
//!
//! A [`Message`] is a heterogeneously typed sequence of values with
//! runtime-reflectable element types. Cloning is cheap (the element
//! vector sits behind an `Arc`); immutability makes sharing across
//! threads safe without copy-on-write.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::addr::ActorAddr;
use crate::error::ExitReason;

/// One element of a [`Message`].
pub type Element = Box<dyn Any + Send + Sync>;

/// Immutable tuple of typed values exchanged between actors.
#[derive(Clone)]
pub struct Message {
    elements: Arc<Vec<Element>>,
}

impl Message {
    /// Build a message from its elements.
    ///
    /// The [`message!`](crate::message) macro is the usual front end.
    #[must_use]
    pub fn new(elements: Vec<Element>) -> Self {
        Self {
            elements: Arc::new(elements),
        }
    }

    /// The empty message.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// `true` when the message has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Borrow element `index` as `T`, if present and of that type.
    #[must_use]
    pub fn get<T: 'static>(&self, index: usize) -> Option<&T> {
        self.elements.get(index)?.downcast_ref::<T>()
    }

    /// `true` when element `index` exists and is a `T`.
    #[must_use]
    pub fn is<T: 'static>(&self, index: usize) -> bool {
        self.get::<T>(index).is_some()
    }

    /// The [`TypeId`] of element `index`, if present.
    #[must_use]
    pub fn type_id(&self, index: usize) -> Option<TypeId> {
        self.elements.get(index).map(|e| (**e).type_id())
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Build a [`Message`] from a list of values.
///
/// ```
/// use weft::{message, Message};
///
/// let m: Message = message![41_i32, "tag".to_string()];
/// assert_eq!(m.get::<i32>(0), Some(&41));
/// assert!(m.is::<String>(1));
/// ```
#[macro_export]
macro_rules! message {
    () => { $crate::Message::empty() };
    ($($elem:expr),+ $(,)?) => {
        $crate::Message::new(vec![
            $(Box::new($elem) as Box<dyn ::std::any::Any + Send + Sync>),+
        ])
    };
}

// ── Runtime-delivered payloads ──────────────────────────────────────────

/// Exit notification delivered to a linked actor that traps exits.
///
/// Without `trap_exit`, exit propagation is handled by the runtime and
/// this type never reaches a behavior.
#[derive(Debug, Clone)]
pub struct ExitMsg {
    /// The actor that terminated.
    pub source: ActorAddr,
    /// Its exit reason.
    pub reason: ExitReason,
}

/// Down notification delivered to a monitoring actor, one per
/// outstanding monitor registration.
#[derive(Debug, Clone)]
pub struct DownMsg {
    /// The actor that terminated.
    pub source: ActorAddr,
    /// Its exit reason.
    pub reason: ExitReason,
}
