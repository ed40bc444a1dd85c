//! Multi-producer / single-consumer actor mailbox.
//!
//! Producers push envelopes onto a Treiber-style stack with a single CAS
//! on the head pointer; the owning actor keeps a private FIFO list and
//! refills it by taking the whole stack and reversing it, so per-producer
//! order is preserved and consumer/producer contention is limited to the
//! head pointer.
//!
//! Two sentinel pointer values encode queue states in the head itself:
//!
//! - *blocked* — the consumer is asleep; the producer that replaces this
//!   sentinel with a real node must reschedule (or wake) the consumer.
//! - *closed* — the actor finalized; enqueues are rejected and the
//!   envelope is handed back to the caller.
//!
//! The blocked/closed transitions are what hand an actor to and from the
//! scheduler atomically with the empty/non-empty state.

use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::addr::ActorAddr;
use crate::error::ExitReason;
use crate::message::{DownMsg, ExitMsg, Message};
use crate::message_id::MessageId;

// ── Envelope ────────────────────────────────────────────────────────────

/// What an envelope carries: a user message or a runtime control signal.
///
/// Control signals are dispatched by the owning actor itself, so peers
/// never mutate each other's link or monitor sets directly.
#[derive(Debug)]
pub(crate) enum Payload {
    /// Application message offered to the behavior stack.
    User(Message),
    /// Exit notification from a linked (or `send_exit`-ing) actor.
    Exit(ExitMsg),
    /// Down notification for a monitor registration.
    Down(DownMsg),
    /// Peer asks to be added to our link set.
    Link(ActorAddr),
    /// Peer asks to be removed from our link set.
    Unlink(ActorAddr),
    /// Peer asks to be added to our monitor (watcher) list.
    Monitor(ActorAddr),
    /// Peer asks for one of its monitor registrations to be removed.
    Demonitor(ActorAddr),
    /// Behavior timeout with its registry id.
    Timeout(u64),
    /// A timed synchronous request expired; carries the awaited
    /// response id.
    SyncTimeout(MessageId),
    /// Error answer to a synchronous request (peer exited or dropped
    /// the request without replying).
    SyncError(ExitReason),
}

/// A single mailbox element: sender, correlation id, payload, and the
/// intrusive link used while the element sits in the producer stack.
pub(crate) struct Envelope {
    pub(crate) sender: Option<ActorAddr>,
    pub(crate) mid: MessageId,
    pub(crate) payload: Payload,
    next: *mut Envelope,
}

impl Envelope {
    pub(crate) fn user(sender: Option<ActorAddr>, mid: MessageId, msg: Message) -> Box<Self> {
        Self::control(sender, mid, Payload::User(msg))
    }

    pub(crate) fn system(payload: Payload) -> Box<Self> {
        Self::control(None, MessageId::default(), payload)
    }

    pub(crate) fn control(
        sender: Option<ActorAddr>,
        mid: MessageId,
        payload: Payload,
    ) -> Box<Self> {
        Box::new(Self {
            sender,
            mid,
            payload,
            next: ptr::null_mut(),
        })
    }
}

// SAFETY: `next` is only read while the envelope is linked into a
// mailbox stack and the taking side synchronizes through the head CAS;
// outside the stack it is never dereferenced. All other fields are Send.
unsafe impl Send for Envelope {}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("mid", &self.mid)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

// ── Enqueue result ──────────────────────────────────────────────────────

/// Producer-side outcome of [`Mailbox::enqueue`].
#[derive(Debug)]
pub(crate) enum EnqueueResult {
    /// Appended; the consumer was already awake or scheduled.
    Enqueued,
    /// Appended and the consumer was sleeping: the caller must
    /// reschedule (cooperative) or wake (thread-mapped) it.
    UnblockedReader,
    /// The mailbox is closed; the envelope is handed back.
    Closed(Box<Envelope>),
}

// ── Mailbox ─────────────────────────────────────────────────────────────

/// Sentinel: consumer is asleep. Never dereferenced.
fn blocked_sentinel() -> *mut Envelope {
    1_usize as *mut Envelope
}

/// Sentinel: mailbox closed. Never dereferenced.
fn closed_sentinel() -> *mut Envelope {
    2_usize as *mut Envelope
}

fn is_node(p: *mut Envelope) -> bool {
    p as usize > 2
}

/// MPSC mailbox owned by exactly one actor.
pub(crate) struct Mailbox {
    stack: AtomicPtr<Envelope>,
    wake_lock: Mutex<()>,
    wake_cond: Condvar,
}

// SAFETY: The raw pointers in `stack` are exclusively owned boxed
// envelopes published via CAS. Producers only touch the head; the single
// consumer is the only side that takes nodes out.
unsafe impl Send for Mailbox {}
// SAFETY: Same reasoning; the consumer-only operations are guarded by the
// single-consumer contract documented on each method.
unsafe impl Sync for Mailbox {}

impl Mailbox {
    pub(crate) fn new() -> Self {
        Self {
            stack: AtomicPtr::new(ptr::null_mut()),
            wake_lock: Mutex::new(()),
            wake_cond: Condvar::new(),
        }
    }

    /// Append an envelope. Wait-free for producers apart from CAS retry.
    pub(crate) fn enqueue(&self, envelope: Box<Envelope>) -> EnqueueResult {
        let node = Box::into_raw(envelope);
        loop {
            let head = self.stack.load(Ordering::Acquire);
            if head == closed_sentinel() {
                // SAFETY: `node` came from Box::into_raw above and was
                // never published.
                return EnqueueResult::Closed(unsafe { Box::from_raw(node) });
            }
            let next = if head == blocked_sentinel() {
                ptr::null_mut()
            } else {
                head
            };
            // SAFETY: `node` is exclusively ours until the CAS below
            // publishes it.
            unsafe { (*node).next = next };
            if self
                .stack
                .compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return if head == blocked_sentinel() {
                    EnqueueResult::UnblockedReader
                } else {
                    EnqueueResult::Enqueued
                };
            }
        }
    }

    /// Take every pending envelope in FIFO order. **Consumer only**, and
    /// only while the consumer is awake (head is never the blocked
    /// sentinel here).
    pub(crate) fn take_pending(&self) -> Vec<Box<Envelope>> {
        let head = self.stack.swap(ptr::null_mut(), Ordering::AcqRel);
        debug_assert!(head != blocked_sentinel(), "consumer raced its own sleep");
        if !is_node(head) {
            if head == closed_sentinel() {
                // Closing is permanent; restore the sentinel.
                self.stack.store(closed_sentinel(), Ordering::Release);
            }
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut cur = head;
        while is_node(cur) {
            // SAFETY: every non-sentinel pointer in the chain was
            // published by `enqueue` from Box::into_raw and is taken out
            // exactly once here.
            let boxed = unsafe { Box::from_raw(cur) };
            cur = boxed.next;
            out.push(boxed);
        }
        out.reverse();
        out
    }

    /// `true` when the producer stack holds at least one real envelope.
    pub(crate) fn has_pending(&self) -> bool {
        is_node(self.stack.load(Ordering::Acquire))
    }

    /// `true` once [`close`](Self::close) ran.
    pub(crate) fn is_closed(&self) -> bool {
        self.stack.load(Ordering::Acquire) == closed_sentinel()
    }

    /// Attempt the empty → blocked transition. **Consumer only.**
    pub(crate) fn try_block(&self) -> bool {
        self.stack
            .compare_exchange(
                ptr::null_mut(),
                blocked_sentinel(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Revert blocked → empty, e.g. when a timed wait expired.
    /// **Consumer only.** Returns `false` if a producer got there first.
    fn try_unblock(&self) -> bool {
        self.stack
            .compare_exchange(
                blocked_sentinel(),
                ptr::null_mut(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Wake a thread-mapped consumer sleeping in
    /// [`await_nonempty`](Self::await_nonempty). Called by the producer
    /// that observed [`EnqueueResult::UnblockedReader`].
    pub(crate) fn wake(&self) {
        let _guard = self
            .wake_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.wake_cond.notify_one();
    }

    /// Block until the mailbox is non-empty or `timeout` elapses.
    /// **Consumer only.** Returns `false` on timeout.
    pub(crate) fn await_nonempty(&self, timeout: Option<Duration>) -> bool {
        if self.has_pending() {
            return true;
        }
        if !self.try_block() {
            // Raced with a producer; data is already there.
            return true;
        }
        let deadline = timeout.map(|d| Instant::now() + d);
        let mut guard = self
            .wake_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if self.stack.load(Ordering::Acquire) != blocked_sentinel() {
                return true;
            }
            match deadline {
                None => {
                    guard = self
                        .wake_cond
                        .wait(guard)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        // If unblocking fails a producer just delivered.
                        return !self.try_unblock();
                    }
                    guard = self
                        .wake_cond
                        .wait_timeout(guard, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    /// Close the mailbox, returning the drained envelopes so the caller
    /// can answer stranded requests. **Consumer only.** Further enqueues
    /// observe [`EnqueueResult::Closed`].
    pub(crate) fn close(&self) -> Vec<Box<Envelope>> {
        let head = self.stack.swap(closed_sentinel(), Ordering::AcqRel);
        debug_assert!(head != blocked_sentinel(), "consumer closed while asleep");
        let mut out = Vec::new();
        let mut cur = head;
        while is_node(cur) {
            // SAFETY: same exclusive-ownership argument as `take_pending`.
            let boxed = unsafe { Box::from_raw(cur) };
            cur = boxed.next;
            out.push(boxed);
        }
        out.reverse();
        out
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        // Free any envelopes that were never consumed.
        let mut cur = self.stack.swap(closed_sentinel(), Ordering::AcqRel);
        while is_node(cur) {
            // SAFETY: the mailbox is being dropped, so no producer or
            // consumer can still reach these nodes.
            let boxed = unsafe { Box::from_raw(cur) };
            cur = boxed.next;
        }
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("closed", &self.is_closed())
            .field("pending", &self.has_pending())
            .finish()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
