//! Exit reasons and error types surfaced by the runtime.

use thiserror::Error;

// ── Exit reasons ────────────────────────────────────────────────────────

/// Why an actor terminated.
///
/// Propagated to linked actors (which adopt the reason unless they trap
/// exits) and to monitoring actors inside a [`DownMsg`](crate::DownMsg).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitReason {
    /// Orderly termination. Linked actors ignore normal exits.
    Normal,
    /// A message handler panicked and no exception handler claimed it.
    UnhandledException,
    /// A synchronous request expired or was answered with an error and
    /// no sync-failure handler was installed.
    UnhandledSyncFailure,
    /// Application-defined reason.
    User(u32),
}

impl ExitReason {
    /// Pack the reason into a `u64` for atomic storage on the actor cell.
    pub(crate) fn encode(self) -> u64 {
        match self {
            Self::Normal => 0,
            Self::UnhandledException => 1,
            Self::UnhandledSyncFailure => 2,
            Self::User(n) => (1 << 32) | u64::from(n),
        }
    }

    /// Inverse of [`encode`](Self::encode).
    pub(crate) fn decode(raw: u64) -> Self {
        if raw & (1 << 32) != 0 {
            return Self::User(raw as u32);
        }
        match raw {
            1 => Self::UnhandledException,
            2 => Self::UnhandledSyncFailure,
            _ => Self::Normal,
        }
    }
}

impl From<u32> for ExitReason {
    fn from(n: u32) -> Self {
        Self::User(n)
    }
}

// ── Errors ──────────────────────────────────────────────────────────────

/// A synchronous send could not be delivered.
///
/// Asynchronous sends never surface these: per the delivery contract they
/// are dropped silently, with linked/monitoring senders notified in-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The destination address no longer refers to a live actor.
    #[error("invalid destination")]
    InvalidDestination,
    /// The destination actor has finalized and closed its mailbox.
    #[error("destination mailbox is closed")]
    MailboxClosed,
}

/// `forward_message` was called in a state where forwarding is undefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ForwardError {
    /// No message is currently being processed.
    #[error("no message is currently being processed")]
    NoCurrentMessage,
    /// The current element is a response; responses are correlated to
    /// their requester and cannot be redirected.
    #[error("response messages cannot be forwarded")]
    ResponseMessage,
}

/// A blocking receive could not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReceiveError {
    /// The actor quit; the caller must unwind its receive loop. This is
    /// the explicit sentinel replacing exception-driven termination.
    #[error("actor exited")]
    Exited,
    /// Blocking receive is only available to thread-mapped actors.
    #[error("blocking receive requires a thread-mapped actor")]
    NotThreadMapped,
}
