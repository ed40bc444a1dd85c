//! Actor identities: weak addresses and strong handles.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use crate::actor::ActorCell;
use crate::mailbox::Envelope;
use crate::message::Message;
use crate::message_id::{MessageId, MessagePriority};

/// Runtime-unique actor identifier, allocated from a per-runtime counter.
pub type ActorId = u64;

/// Stable, weak identity of an actor.
///
/// Comparable and hashable by id; holding an address does not keep the
/// actor alive. Obtain a strong [`ActorHandle`] at spawn time to control
/// the actor's lifetime.
#[derive(Clone)]
pub struct ActorAddr {
    id: ActorId,
    cell: Weak<ActorCell>,
}

impl ActorAddr {
    pub(crate) fn new(id: ActorId, cell: Weak<ActorCell>) -> Self {
        Self { id, cell }
    }

    /// The actor's id.
    #[must_use]
    pub fn id(&self) -> ActorId {
        self.id
    }

    /// `true` while the target actor has neither terminated nor been
    /// dropped.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.cell
            .upgrade()
            .is_some_and(|cell| !cell.is_terminated())
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<ActorCell>> {
        self.cell.upgrade()
    }

    /// Deliver a runtime-internal envelope, dropping it if the target is
    /// gone.
    pub(crate) fn deliver(&self, envelope: Box<Envelope>) {
        if let Some(cell) = self.cell.upgrade() {
            cell.enqueue(envelope);
        }
    }
}

impl PartialEq for ActorAddr {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ActorAddr {}

impl Hash for ActorAddr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ActorAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorAddr({})", self.id)
    }
}

/// Strong reference keeping the target actor's cell alive.
#[derive(Clone)]
pub struct ActorHandle {
    cell: Arc<ActorCell>,
}

impl ActorHandle {
    pub(crate) fn new(cell: Arc<ActorCell>) -> Self {
        Self { cell }
    }

    /// The actor's id.
    #[must_use]
    pub fn id(&self) -> ActorId {
        self.cell.id()
    }

    /// Downgrade to a weak [`ActorAddr`].
    #[must_use]
    pub fn addr(&self) -> ActorAddr {
        self.cell.addr()
    }

    /// Send an anonymous asynchronous message with normal priority.
    ///
    /// Sends to a terminated actor are dropped silently.
    pub fn send(&self, msg: Message) {
        self.send_prioritized(MessagePriority::Normal, msg);
    }

    /// Send an anonymous asynchronous message with the given priority.
    pub fn send_prioritized(&self, priority: MessagePriority, msg: Message) {
        self.cell
            .enqueue(Envelope::user(None, MessageId::make(priority), msg));
    }
}

impl From<&ActorHandle> for ActorAddr {
    fn from(handle: &ActorHandle) -> Self {
        handle.addr()
    }
}

impl fmt::Debug for ActorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorHandle({})", self.id())
    }
}
