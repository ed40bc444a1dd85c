//! 64-bit message correlation identifiers.
//!
//! A [`MessageId`] carries everything the dispatch layer needs to route a
//! message without inspecting its payload:
//!
//! ```text
//! ┌───────┬───────┬───────────┬────────────────────────────────────┐
//! │ 63    │ 62    │ 61..60    │ 59..0                              │
//! │ resp  │ req   │ priority  │ per-actor request sequence number  │
//! └───────┴───────┴───────────┴────────────────────────────────────┘
//! ```
//!
//! Asynchronous messages have neither flag set and sequence 0. A response
//! id is derived from its request id by flipping the flag pair, so the
//! requester can match replies by plain equality.

const RESPONSE_FLAG: u64 = 1 << 63;
const REQUEST_FLAG: u64 = 1 << 62;
const PRIORITY_SHIFT: u32 = 60;
const PRIORITY_MASK: u64 = 0b11 << PRIORITY_SHIFT;
const SEQUENCE_MASK: u64 = (1 << PRIORITY_SHIFT) - 1;

/// Scheduling priority carried in the id's two priority bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MessagePriority {
    /// Default priority.
    #[default]
    Normal = 0,
    /// Elevated priority.
    High = 1,
}

/// Correlator attached to every mailbox element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(u64);

impl MessageId {
    /// Build an id for an asynchronous (fire-and-forget) message.
    #[must_use]
    pub fn make(priority: MessagePriority) -> Self {
        Self((priority as u64) << PRIORITY_SHIFT)
    }

    /// Build a request id from a fresh per-actor sequence number.
    ///
    /// Sequence numbers start at 1; 0 is reserved for async messages.
    pub(crate) fn request(sequence: u64, priority: MessagePriority) -> Self {
        debug_assert!(sequence != 0, "request sequence numbers start at 1");
        Self(REQUEST_FLAG | ((priority as u64) << PRIORITY_SHIFT) | (sequence & SEQUENCE_MASK))
    }

    /// `true` when neither the request nor the response flag is set.
    #[must_use]
    pub fn is_async(self) -> bool {
        self.0 & (REQUEST_FLAG | RESPONSE_FLAG) == 0
    }

    /// `true` for a synchronous request awaiting a response.
    #[must_use]
    pub fn is_request(self) -> bool {
        self.0 & REQUEST_FLAG != 0
    }

    /// `true` for a response to an earlier request.
    #[must_use]
    pub fn is_response(self) -> bool {
        self.0 & RESPONSE_FLAG != 0
    }

    /// The priority encoded into this id.
    #[must_use]
    pub fn priority(self) -> MessagePriority {
        if (self.0 & PRIORITY_MASK) >> PRIORITY_SHIFT == MessagePriority::High as u64 {
            MessagePriority::High
        } else {
            MessagePriority::Normal
        }
    }

    /// Re-encode the priority bits, keeping flags and sequence.
    #[must_use]
    pub fn with_priority(self, priority: MessagePriority) -> Self {
        Self((self.0 & !PRIORITY_MASK) | ((priority as u64) << PRIORITY_SHIFT))
    }

    /// The per-actor request sequence number (0 for async ids).
    #[must_use]
    pub fn sequence(self) -> u64 {
        self.0 & SEQUENCE_MASK
    }

    /// Derive the response id echoing this request id.
    #[must_use]
    pub fn response_id(self) -> Self {
        Self((self.0 & !REQUEST_FLAG) | RESPONSE_FLAG)
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::make(MessagePriority::Normal)
    }
}
