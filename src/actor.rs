//! The local actor: cell, dispatch state, and the user-facing context.
//!
//! An [`ActorCell`] is the shared identity of an actor: mailbox, lifecycle
//! state machine, and the mutex-held [`DispatchState`]. Exactly one
//! execution unit drives a cell at any time — a scheduler worker for
//! cooperative actors, a dedicated OS thread for thread-mapped ones — so
//! the dispatch mutex is uncontended and exists only to move the state
//! between workers safely.
//!
//! [`LocalActor`] is the view handed to behaviors and init closures. It
//! exposes the full operation surface: sends, become/unbecome, blocking
//! receive, request correlation, links, monitors, lifecycle hooks, and
//! spawning.
//!
//! Lifecycle: `inactive → runnable → running → (awaiting | finalizing) →
//! done`, driven by CAS transitions on the cell plus the mailbox's
//! blocked/closed sentinels.

use std::collections::{HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::addr::{ActorAddr, ActorHandle, ActorId};
use crate::behavior::{Behavior, BehaviorStack, Handled};
use crate::error::{ExitReason, ForwardError, ReceiveError, SendError};
use crate::mailbox::{Envelope, Mailbox, Payload};
use crate::message::{DownMsg, ExitMsg, Message};
use crate::message_id::{MessageId, MessagePriority};
use crate::request::{PendingResponses, RequestId, ResponsePromise, TypedResponsePromise};
use crate::runtime::{self, RuntimeCore, SpawnOptions};
use crate::scheduler::{Resumable, ResumeResult};
use crate::timeout::TimeoutRegistry;

// ── Lifecycle ───────────────────────────────────────────────────────────

pub(crate) mod lifecycle {
    pub const INACTIVE: u8 = 0;
    pub const RUNNABLE: u8 = 1;
    pub const RUNNING: u8 = 2;
    pub const AWAITING: u8 = 3;
    pub const FINALIZING: u8 = 4;
    pub const DONE: u8 = 5;
}

/// How the actor is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecKind {
    /// Multiplexed onto the worker pool via [`Resumable`].
    Cooperative,
    /// Owns a dedicated OS thread and may use blocking receive.
    ThreadMapped,
}

// ── Attachables ─────────────────────────────────────────────────────────

/// Per-actor cleanup hook, invoked at finalization with the exit reason.
/// May also observe exceptions raised during dispatch and map them to an
/// exit reason.
pub trait Attachable: Send {
    /// Called exactly once when the actor finalizes.
    fn actor_exited(&mut self, _reason: ExitReason) {}

    /// Called when a handler panicked; return `Some` to choose the exit
    /// reason. Handlers added later are consulted first.
    fn handle_exception(&mut self, _description: &str) -> Option<ExitReason> {
        None
    }
}

struct ExceptionHandler<F> {
    f: F,
}

impl<F> Attachable for ExceptionHandler<F>
where
    F: FnMut(&str) -> Option<ExitReason> + Send,
{
    fn handle_exception(&mut self, description: &str) -> Option<ExitReason> {
        (self.f)(description)
    }
}

// ── Dispatch state ──────────────────────────────────────────────────────

pub(crate) type InitFn = Box<dyn FnOnce(&mut LocalActor<'_>) -> Behavior + Send>;
type Hook = Box<dyn FnMut(&mut LocalActor<'_>) + Send>;

/// Outcome of offering one mailbox element to the dispatch machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InvokeOutcome {
    /// Matched: a behavior, timeout clause, or response handler ran.
    Consumed,
    /// Consumed by the runtime itself (control traffic, stale ids); a
    /// blocking receive keeps waiting after one of these.
    Intercepted,
    /// Did not match the current behavior or awaited id; cached.
    Cached,
    /// No handler and not awaited; destroyed.
    Dropped,
}

/// Everything the single execution unit mutates while driving the actor.
pub(crate) struct DispatchState {
    init: Option<InitFn>,
    bhvr_stack: BehaviorStack,
    pending: PendingResponses,
    timeouts: TimeoutRegistry,
    /// Consumer-private FIFO refilled from the mailbox stack.
    fifo: VecDeque<Box<Envelope>>,
    /// Elements skipped by the current behavior, retried after the next
    /// behavior change.
    cache: VecDeque<Box<Envelope>>,
    /// The element whose handler is on the stack right now.
    current: Option<Box<Envelope>>,
    planned_exit: Option<ExitReason>,
    trap_exit: bool,
    behavior_changed: bool,
    last_request: u64,
    links: HashSet<ActorAddr>,
    /// Watchers observing this actor; one down notification each.
    monitors: Vec<ActorAddr>,
    attachables: Vec<Box<dyn Attachable>>,
    on_exit: Option<Hook>,
    sync_failure: Option<Hook>,
    joined_groups: Vec<String>,
    registered_names: Vec<String>,
}

impl DispatchState {
    pub(crate) fn new(
        init: Option<InitFn>,
        links: Vec<ActorAddr>,
        monitors: Vec<ActorAddr>,
    ) -> Self {
        Self {
            init,
            bhvr_stack: BehaviorStack::default(),
            pending: PendingResponses::default(),
            timeouts: TimeoutRegistry::default(),
            fifo: VecDeque::new(),
            cache: VecDeque::new(),
            current: None,
            planned_exit: None,
            trap_exit: false,
            behavior_changed: false,
            last_request: 0,
            links: links.into_iter().collect(),
            monitors,
            attachables: Vec::new(),
            on_exit: None,
            sync_failure: None,
            joined_groups: Vec::new(),
            registered_names: Vec::new(),
        }
    }

    /// Non-quiescent: a behavior is installed or a response is awaited.
    fn has_behavior(&self) -> bool {
        !self.bhvr_stack.is_empty() || !self.pending.is_empty()
    }

    fn next_message(&mut self, mailbox: &Mailbox) -> Option<Box<Envelope>> {
        if self.fifo.is_empty() {
            self.fifo.extend(mailbox.take_pending());
        }
        self.fifo.pop_front()
    }

    /// Duration to arm when idling, if the active behavior has a timeout
    /// clause and none is armed yet.
    fn timeout_to_arm(&self) -> Option<Duration> {
        if !self.pending.is_empty() || self.timeouts.has_active() {
            return None;
        }
        self.bhvr_stack.top()?.timeout_after()
    }
}

fn describe_panic(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Consult exception handlers, most recently attached first.
fn exception_reason(state: &mut DispatchState, description: &str) -> ExitReason {
    for attachable in state.attachables.iter_mut().rev() {
        if let Some(reason) = attachable.handle_exception(description) {
            return reason;
        }
    }
    ExitReason::UnhandledException
}

// ── Actor cell ──────────────────────────────────────────────────────────

/// Shared identity and synchronization point of one actor.
pub(crate) struct ActorCell {
    id: ActorId,
    kind: ExecKind,
    mailbox: Mailbox,
    lifecycle: AtomicU8,
    /// Exit reason, recorded during finalization for late linkers and
    /// monitors.
    exit_code: AtomicU64,
    runtime: Arc<RuntimeCore>,
    self_weak: Weak<ActorCell>,
    dispatch: Mutex<DispatchState>,
}

impl ActorCell {
    pub(crate) fn new(
        id: ActorId,
        kind: ExecKind,
        runtime: Arc<RuntimeCore>,
        state: DispatchState,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            id,
            kind,
            mailbox: Mailbox::new(),
            lifecycle: AtomicU8::new(lifecycle::INACTIVE),
            exit_code: AtomicU64::new(ExitReason::Normal.encode()),
            runtime,
            self_weak: self_weak.clone(),
            dispatch: Mutex::new(state),
        })
    }

    pub(crate) fn id(&self) -> ActorId {
        self.id
    }

    pub(crate) fn addr(&self) -> ActorAddr {
        ActorAddr::new(self.id, self.self_weak.clone())
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) >= lifecycle::FINALIZING
    }

    pub(crate) fn exit_reason(&self) -> ExitReason {
        ExitReason::decode(self.exit_code.load(Ordering::Acquire))
    }

    /// Mark runnable and hand to the scheduler (cooperative launch path).
    pub(crate) fn launch(self: &Arc<Self>) {
        self.lifecycle.store(lifecycle::RUNNABLE, Ordering::Release);
        self.runtime.scheduler().schedule(Arc::clone(self) as Arc<dyn Resumable>);
    }

    // ── Producer side ───────────────────────────────────────────────

    /// Enqueue, waking or rescheduling a sleeping consumer. Undeliverable
    /// envelopes are answered in-band where the sender would otherwise
    /// hang.
    pub(crate) fn enqueue(&self, envelope: Box<Envelope>) {
        if let Err(envelope) = self.try_enqueue(envelope) {
            self.answer_stranded(envelope);
        }
    }

    /// Enqueue, handing the envelope back when the mailbox is closed.
    pub(crate) fn try_enqueue(&self, envelope: Box<Envelope>) -> Result<(), Box<Envelope>> {
        match self.mailbox.enqueue(envelope) {
            crate::mailbox::EnqueueResult::Enqueued => Ok(()),
            crate::mailbox::EnqueueResult::UnblockedReader => {
                self.on_unblocked();
                Ok(())
            }
            crate::mailbox::EnqueueResult::Closed(envelope) => Err(envelope),
        }
    }

    /// The producer that flipped the blocked sentinel owns the wakeup.
    fn on_unblocked(&self) {
        match self.kind {
            ExecKind::Cooperative => {
                self.lifecycle.store(lifecycle::RUNNABLE, Ordering::Release);
                if let Some(me) = self.self_weak.upgrade() {
                    self.runtime.scheduler().schedule(me as Arc<dyn Resumable>);
                }
            }
            ExecKind::ThreadMapped => self.mailbox.wake(),
        }
    }

    /// Answer an envelope that can no longer be delivered so its sender
    /// is not left waiting: requests get an error response, link and
    /// monitor handshakes get the exit/down notification directly.
    fn answer_stranded(&self, envelope: Box<Envelope>) {
        let my_addr = self.addr();
        let reason = self.exit_reason();
        let Envelope { sender, mid, payload, .. } = *envelope;
        match payload {
            Payload::User(_) if mid.is_request() => {
                if let Some(sender) = sender {
                    sender.deliver(Envelope::control(
                        Some(my_addr),
                        mid.response_id(),
                        Payload::SyncError(reason),
                    ));
                }
            }
            Payload::Link(peer) => {
                peer.deliver(Envelope::system(Payload::Exit(ExitMsg {
                    source: my_addr,
                    reason,
                })));
            }
            Payload::Monitor(watcher) => {
                watcher.deliver(Envelope::system(Payload::Down(DownMsg {
                    source: my_addr,
                    reason,
                })));
            }
            _ => trace!(actor = self.id, "dropping message for closed mailbox"),
        }
    }

    // ── Dispatch ────────────────────────────────────────────────────

    /// Dispatch one element against the current behavior / awaited id.
    pub(crate) fn dispatch_one(
        &self,
        state: &mut DispatchState,
        node: Box<Envelope>,
    ) -> InvokeOutcome {
        self.runtime.note_dispatch();
        if let Some(awaited) = state.pending.front_id() {
            let bhvr = state.pending.front_handler();
            self.invoke_message(state, node, bhvr, Some(awaited))
        } else {
            let bhvr = state.bhvr_stack.top().cloned();
            self.invoke_message(state, node, bhvr, None)
        }
    }

    /// The matching rules: responses against the awaited id, runtime
    /// interception of control messages, then the offered behavior.
    fn invoke_message(
        &self,
        state: &mut DispatchState,
        mut node: Box<Envelope>,
        bhvr: Option<Behavior>,
        awaited: Option<MessageId>,
    ) -> InvokeOutcome {
        match &node.payload {
            Payload::Exit(exit) => {
                let exit = exit.clone();
                state.links.remove(&exit.source);
                if !state.trap_exit {
                    if exit.reason != ExitReason::Normal {
                        state.planned_exit = Some(exit.reason);
                    }
                    return InvokeOutcome::Intercepted;
                }
                // Trapped: the exit becomes an ordinary dispatch.
                node.payload = Payload::User(crate::message![exit]);
            }
            Payload::Down(down) => {
                let down = down.clone();
                node.payload = Payload::User(crate::message![down]);
            }
            Payload::Link(peer) => {
                trace!(actor = self.id, peer = peer.id(), "link added");
                let peer = peer.clone();
                state.links.insert(peer);
                return InvokeOutcome::Intercepted;
            }
            Payload::Unlink(peer) => {
                state.links.remove(peer);
                return InvokeOutcome::Intercepted;
            }
            Payload::Monitor(watcher) => {
                let watcher = watcher.clone();
                state.monitors.push(watcher);
                return InvokeOutcome::Intercepted;
            }
            Payload::Demonitor(watcher) => {
                if let Some(i) = state.monitors.iter().position(|m| m == watcher) {
                    state.monitors.remove(i);
                }
                return InvokeOutcome::Intercepted;
            }
            Payload::Timeout(id) => {
                let id = *id;
                if state.timeouts.is_active(id) {
                    state.timeouts.consume(id);
                    if let Some(bhvr) = bhvr {
                        let mut actor = LocalActor { cell: self, state: &mut *state };
                        bhvr.handle_timeout(&mut actor);
                    }
                    return InvokeOutcome::Consumed;
                }
                trace!(actor = self.id, id, "stale timeout dropped");
                return InvokeOutcome::Intercepted;
            }
            Payload::SyncTimeout(response_id) => {
                let response_id = *response_id;
                if state.pending.remove(response_id).is_some() {
                    state.behavior_changed = true;
                    self.handle_sync_failure(state);
                } else {
                    trace!(actor = self.id, "sync timeout after response arrived");
                }
                return InvokeOutcome::Intercepted;
            }
            Payload::SyncError(_) => {
                let mid = node.mid;
                if state.pending.remove(mid).is_some() {
                    state.behavior_changed = true;
                    self.handle_sync_failure(state);
                } else {
                    trace!(actor = self.id, "stale error response dropped");
                }
                return InvokeOutcome::Intercepted;
            }
            Payload::User(_) => {}
        }

        let msg = match &node.payload {
            Payload::User(msg) => msg.clone(),
            _ => return InvokeOutcome::Intercepted,
        };
        let mid = node.mid;

        if mid.is_response() {
            if awaited == Some(mid) {
                let Some(handler) = state.pending.pop_front() else {
                    return InvokeOutcome::Dropped;
                };
                state.behavior_changed = true;
                return self.run_handler(state, &handler, node, &msg);
            }
            if state.pending.awaits(mid) {
                // Out of order: parked until its handler is the front.
                state.cache.push_back(node);
                return InvokeOutcome::Cached;
            }
            trace!(actor = self.id, "stale response dropped");
            return InvokeOutcome::Dropped;
        }

        if awaited.is_some() {
            // Awaiting a response; ordinary traffic is deferred.
            state.cache.push_back(node);
            return InvokeOutcome::Cached;
        }

        match bhvr {
            Some(bhvr) => self.run_handler(state, &bhvr, node, &msg),
            None => {
                trace!(actor = self.id, "message dropped: no behavior");
                InvokeOutcome::Dropped
            }
        }
    }

    /// Run one handler under the dispatch guard: the element sits in the
    /// current slot while the handler executes; `forward_message` steals
    /// it, otherwise it is cached (skip) or destroyed here.
    fn run_handler(
        &self,
        state: &mut DispatchState,
        handler: &Behavior,
        node: Box<Envelope>,
        msg: &Message,
    ) -> InvokeOutcome {
        // Dispatching a message resets the idle clock; a previously
        // armed timeout must not fire against the new situation.
        state.timeouts.invalidate();
        state.current = Some(node);
        let outcome = {
            let mut actor = LocalActor { cell: self, state: &mut *state };
            catch_unwind(AssertUnwindSafe(|| handler.invoke(&mut actor, msg)))
        };
        match outcome {
            Err(payload) => {
                let description = describe_panic(payload.as_ref());
                warn!(actor = self.id, panic = %description, "handler panicked");
                let reason = exception_reason(state, &description);
                state.planned_exit = Some(reason);
                state.current = None;
                InvokeOutcome::Consumed
            }
            Ok(Handled::Done) => {
                state.current = None;
                InvokeOutcome::Consumed
            }
            Ok(Handled::Reply(reply)) => {
                if let Some(envelope) = state.current.take() {
                    self.reply_to(&envelope, reply);
                }
                InvokeOutcome::Consumed
            }
            Ok(Handled::Skipped) => match state.current.take() {
                Some(envelope) => {
                    state.cache.push_back(envelope);
                    InvokeOutcome::Cached
                }
                // forward_message released the element; treat as consumed.
                None => InvokeOutcome::Consumed,
            },
        }
    }

    fn reply_to(&self, envelope: &Envelope, reply: Message) {
        let Some(sender) = &envelope.sender else {
            return;
        };
        let mid = if envelope.mid.is_request() {
            envelope.mid.response_id()
        } else {
            MessageId::make(envelope.mid.priority())
        };
        sender.deliver(Envelope::user(Some(self.addr()), mid, reply));
    }

    fn handle_sync_failure(&self, state: &mut DispatchState) {
        if let Some(mut hook) = state.sync_failure.take() {
            {
                let mut actor = LocalActor { cell: self, state: &mut *state };
                hook(&mut actor);
            }
            if state.sync_failure.is_none() {
                state.sync_failure = Some(hook);
            }
        } else {
            state.planned_exit = Some(ExitReason::UnhandledSyncFailure);
        }
    }

    /// Retry cached elements after a behavior change.
    fn drain_cache(&self, state: &mut DispatchState) {
        let cached: Vec<Box<Envelope>> = state.cache.drain(..).collect();
        for node in cached {
            if state.planned_exit.is_some() {
                state.cache.push_back(node);
                continue;
            }
            self.dispatch_one(state, node);
        }
    }

    /// Retry cached elements against an explicit behavior (blocking
    /// receive). Returns `true` once one element was consumed.
    fn try_cache(&self, state: &mut DispatchState, bhvr: &Behavior) -> bool {
        let cached: Vec<Box<Envelope>> = state.cache.drain(..).collect();
        let mut consumed = false;
        for node in cached {
            if consumed || state.planned_exit.is_some() {
                state.cache.push_back(node);
                continue;
            }
            if self.invoke_message(state, node, Some(bhvr.clone()), None)
                == InvokeOutcome::Consumed
            {
                consumed = true;
            }
        }
        consumed
    }

    fn arm_timeout(&self, state: &mut DispatchState) {
        if let Some(after) = state.timeout_to_arm() {
            let id = state.timeouts.request();
            self.runtime
                .timer()
                .schedule(after, self.addr(), Envelope::system(Payload::Timeout(id)));
        }
    }

    // ── Finalization ────────────────────────────────────────────────

    /// Run the quit sequence. Returns `false` when `on_exit` installed a
    /// new behavior, which cancels the exit (and clears the planned
    /// reason).
    pub(crate) fn finalize(&self, state: &mut DispatchState) -> bool {
        state.bhvr_stack.clear();
        state.pending.clear();
        state.timeouts.invalidate();
        if let Some(mut hook) = state.on_exit.take() {
            {
                let mut actor = LocalActor { cell: self, state: &mut *state };
                hook(&mut actor);
            }
            if state.on_exit.is_none() {
                state.on_exit = Some(hook);
            }
        }
        if state.has_behavior() {
            debug!(actor = self.id, "exit cancelled: on_exit installed a behavior");
            state.planned_exit = None;
            state.behavior_changed = true;
            return false;
        }

        let reason = state.planned_exit.take().unwrap_or(ExitReason::Normal);
        self.exit_code.store(reason.encode(), Ordering::Release);
        self.lifecycle
            .store(lifecycle::FINALIZING, Ordering::Release);
        let my_addr = self.addr();

        for peer in state.links.drain() {
            peer.deliver(Envelope::system(Payload::Exit(ExitMsg {
                source: my_addr.clone(),
                reason,
            })));
        }
        for watcher in state.monitors.drain(..) {
            watcher.deliver(Envelope::system(Payload::Down(DownMsg {
                source: my_addr.clone(),
                reason,
            })));
        }
        for mut attachable in state.attachables.drain(..) {
            attachable.actor_exited(reason);
        }
        for group in state.joined_groups.drain(..) {
            self.runtime.groups().unsubscribe(&group, &my_addr);
        }
        for name in state.registered_names.drain(..) {
            self.runtime.registry().unregister(&name);
        }

        let mut stranded: Vec<Box<Envelope>> = state.fifo.drain(..).collect();
        stranded.extend(state.cache.drain(..));
        stranded.extend(self.mailbox.close());
        for envelope in stranded {
            self.answer_stranded(envelope);
        }

        self.lifecycle.store(lifecycle::DONE, Ordering::Release);
        debug!(actor = self.id, ?reason, "actor terminated");
        true
    }

    // ── Thread-mapped driver ────────────────────────────────────────

    /// Body of a thread-mapped actor's dedicated thread.
    pub(crate) fn run_thread_mapped(&self, body: Box<dyn FnOnce(&mut LocalActor<'_>) + Send>) {
        self.lifecycle.store(lifecycle::RUNNING, Ordering::Release);
        let mut guard = self
            .dispatch
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;

        let outcome = {
            let mut actor = LocalActor { cell: self, state: &mut *state };
            catch_unwind(AssertUnwindSafe(move || body(&mut actor)))
        };
        if let Err(payload) = outcome {
            let description = describe_panic(payload.as_ref());
            warn!(actor = self.id, panic = %description, "actor body panicked");
            let reason = exception_reason(state, &description);
            state.planned_exit.get_or_insert(reason);
        }

        loop {
            if state.planned_exit.is_none() {
                state.planned_exit = Some(ExitReason::Normal);
            }
            if self.finalize(state) {
                break;
            }
            // on_exit rebound the actor: keep dispatching until it quits
            // again.
            self.blocking_drive(state);
        }
    }

    /// Event loop for a rebound thread-mapped actor: dispatch from the
    /// installed behaviors until the actor plans an exit.
    fn blocking_drive(&self, state: &mut DispatchState) {
        loop {
            if state.planned_exit.is_some() {
                return;
            }
            if !state.has_behavior() {
                state.planned_exit = Some(ExitReason::Normal);
                return;
            }
            if state.behavior_changed {
                state.behavior_changed = false;
                self.drain_cache(state);
                continue;
            }
            match state.next_message(&self.mailbox) {
                Some(node) => {
                    self.dispatch_one(state, node);
                }
                None => {
                    self.arm_timeout(state);
                    self.mailbox.await_nonempty(None);
                }
            }
        }
    }
}

// ── Resumable contract ──────────────────────────────────────────────────

impl Resumable for ActorCell {
    /// Pull and dispatch up to `max_throughput` messages.
    fn resume(&self, max_throughput: usize) -> ResumeResult {
        if self
            .lifecycle
            .compare_exchange(
                lifecycle::RUNNABLE,
                lifecycle::RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return if self.lifecycle.load(Ordering::Acquire) == lifecycle::DONE {
                ResumeResult::Done
            } else {
                ResumeResult::Awaiting
            };
        }

        let mut guard = self
            .dispatch
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;

        if let Some(init) = state.init.take() {
            let bootstrapped = {
                let mut actor = LocalActor { cell: self, state: &mut *state };
                catch_unwind(AssertUnwindSafe(move || init(&mut actor)))
            };
            match bootstrapped {
                Ok(bhvr) => state.bhvr_stack.push(bhvr),
                Err(payload) => {
                    let description = describe_panic(payload.as_ref());
                    warn!(actor = self.id, panic = %description, "init panicked");
                    let reason = exception_reason(state, &description);
                    state.planned_exit.get_or_insert(reason);
                }
            }
        }

        let mut handled = 0_usize;
        loop {
            if state.planned_exit.is_some() {
                if self.finalize(state) {
                    return ResumeResult::Done;
                }
                continue;
            }
            if !state.has_behavior() {
                state.planned_exit = Some(ExitReason::Normal);
                continue;
            }
            if state.behavior_changed {
                state.behavior_changed = false;
                self.drain_cache(state);
                continue;
            }
            if handled >= max_throughput
                && (!state.fifo.is_empty() || self.mailbox.has_pending())
            {
                self.lifecycle.store(lifecycle::RUNNABLE, Ordering::Release);
                return ResumeResult::ResumeLater;
            }
            match state.next_message(&self.mailbox) {
                Some(node) => {
                    self.dispatch_one(state, node);
                    handled += 1;
                }
                None => {
                    self.arm_timeout(state);
                    self.lifecycle.store(lifecycle::AWAITING, Ordering::Release);
                    if self.mailbox.try_block() {
                        return ResumeResult::Awaiting;
                    }
                    // A producer slipped in between; keep running.
                    self.lifecycle.store(lifecycle::RUNNING, Ordering::Release);
                }
            }
        }
    }
}

// ── LocalActor: the handler-facing context ──────────────────────────────

/// View of the running actor handed to behaviors, init closures, and
/// thread-mapped actor bodies.
pub struct LocalActor<'a> {
    cell: &'a ActorCell,
    state: &'a mut DispatchState,
}

impl LocalActor<'_> {
    /// This actor's id.
    #[must_use]
    pub fn id(&self) -> ActorId {
        self.cell.id
    }

    /// This actor's address.
    #[must_use]
    pub fn addr(&self) -> ActorAddr {
        self.cell.addr()
    }

    // ── Send paths ──────────────────────────────────────────────────

    /// Asynchronous send with normal priority.
    pub fn send(&mut self, dest: &ActorAddr, msg: Message) {
        self.send_prioritized(MessagePriority::Normal, dest, msg);
    }

    /// Asynchronous send with an explicit priority.
    pub fn send_prioritized(
        &mut self,
        priority: MessagePriority,
        dest: &ActorAddr,
        msg: Message,
    ) {
        dest.deliver(Envelope::user(
            Some(self.addr()),
            MessageId::make(priority),
            msg,
        ));
    }

    /// Deliver `msg` to `dest` after `delay`. A zero delay enqueues
    /// inline and is indistinguishable from [`send`](Self::send).
    pub fn delayed_send(&mut self, dest: &ActorAddr, delay: Duration, msg: Message) {
        let envelope = Envelope::user(
            Some(self.addr()),
            MessageId::make(MessagePriority::Normal),
            msg,
        );
        self.cell
            .runtime
            .timer()
            .schedule(delay, dest.clone(), envelope);
    }

    /// Send an exit message. The receiver auto-exits unless it traps
    /// exits or `reason` is [`ExitReason::Normal`].
    pub fn send_exit(&mut self, dest: &ActorAddr, reason: ExitReason) {
        dest.deliver(Envelope::system(Payload::Exit(ExitMsg {
            source: self.addr(),
            reason,
        })));
    }

    /// Re-enqueue the element under dispatch to `dest`, preserving the
    /// original sender, and release it from this actor.
    pub fn forward_message(
        &mut self,
        dest: &ActorAddr,
        priority: MessagePriority,
    ) -> Result<(), ForwardError> {
        match &self.state.current {
            None => Err(ForwardError::NoCurrentMessage),
            Some(envelope) if envelope.mid.is_response() => Err(ForwardError::ResponseMessage),
            Some(_) => {
                let mut envelope = self
                    .state
                    .current
                    .take()
                    .ok_or(ForwardError::NoCurrentMessage)?;
                envelope.mid = envelope.mid.with_priority(priority);
                dest.deliver(envelope);
                Ok(())
            }
        }
    }

    // ── Behavior stack ──────────────────────────────────────────────

    /// Install `bhvr` as the active behavior: replace the top when
    /// `discard_old`, push on top of it otherwise. Invalidates any armed
    /// timeout.
    pub fn do_become(&mut self, bhvr: Behavior, discard_old: bool) {
        self.state.timeouts.invalidate();
        if discard_old {
            self.state.bhvr_stack.replace_top(bhvr);
        } else {
            self.state.bhvr_stack.push(bhvr);
        }
        self.state.behavior_changed = true;
    }

    /// Pop the active behavior, restoring the previous one.
    pub fn unbecome(&mut self) {
        self.state.timeouts.invalidate();
        self.state.bhvr_stack.pop();
        self.state.behavior_changed = true;
    }

    /// Depth of the behavior stack.
    #[must_use]
    pub fn behavior_depth(&self) -> usize {
        self.state.bhvr_stack.len()
    }

    // ── Blocking receive (thread-mapped actors) ─────────────────────

    /// Block until one message matches `bhvr` (or its timeout clause
    /// fires). Returns [`ReceiveError::Exited`] once the actor quit.
    pub fn receive(&mut self, bhvr: &Behavior) -> Result<(), ReceiveError> {
        if self.cell.kind != ExecKind::ThreadMapped {
            return Err(ReceiveError::NotThreadMapped);
        }
        loop {
            if self.state.planned_exit.is_some() {
                return Err(ReceiveError::Exited);
            }
            if self.cell.try_cache(self.state, bhvr) {
                break;
            }
            match self.state.next_message(&self.cell.mailbox) {
                Some(node) => {
                    if self
                        .cell
                        .invoke_message(self.state, node, Some(bhvr.clone()), None)
                        == InvokeOutcome::Consumed
                    {
                        break;
                    }
                }
                None => {
                    // Arm this receive's timeout clause before sleeping.
                    if let Some(after) = bhvr.timeout_after() {
                        if !self.state.timeouts.has_active() {
                            let id = self.state.timeouts.request();
                            self.cell.runtime.timer().schedule(
                                after,
                                self.addr(),
                                Envelope::system(Payload::Timeout(id)),
                            );
                        }
                    }
                    self.cell.mailbox.await_nonempty(None);
                }
            }
        }
        if self.state.planned_exit.is_some() {
            Err(ReceiveError::Exited)
        } else {
            Ok(())
        }
    }

    /// Block until the response for `req` is dispatched through
    /// `handler` (or the request fails).
    pub fn receive_response(
        &mut self,
        req: RequestId,
        handler: Behavior,
    ) -> Result<(), ReceiveError> {
        if self.cell.kind != ExecKind::ThreadMapped {
            return Err(ReceiveError::NotThreadMapped);
        }
        self.await_response(req, handler);
        loop {
            if self.state.planned_exit.is_some() {
                return Err(ReceiveError::Exited);
            }
            if !self.state.pending.awaits(req.response_id()) {
                return Ok(());
            }
            if self.state.behavior_changed {
                self.state.behavior_changed = false;
                self.cell.drain_cache(self.state);
                continue;
            }
            match self.state.next_message(&self.cell.mailbox) {
                Some(node) => {
                    self.cell.dispatch_one(self.state, node);
                }
                None => {
                    self.cell.mailbox.await_nonempty(None);
                }
            }
        }
    }

    // ── Request/response correlation ────────────────────────────────

    fn new_request_id(&mut self, priority: MessagePriority) -> MessageId {
        self.state.last_request += 1;
        MessageId::request(self.state.last_request, priority)
    }

    /// Send a synchronous request; attach the response handler with
    /// [`await_response`](Self::await_response).
    pub fn sync_send(&mut self, dest: &ActorAddr, msg: Message) -> Result<RequestId, SendError> {
        self.sync_send_prioritized(MessagePriority::Normal, dest, msg)
    }

    /// [`sync_send`](Self::sync_send) with an explicit priority.
    pub fn sync_send_prioritized(
        &mut self,
        priority: MessagePriority,
        dest: &ActorAddr,
        msg: Message,
    ) -> Result<RequestId, SendError> {
        let cell = dest.upgrade().ok_or(SendError::InvalidDestination)?;
        let req_id = self.new_request_id(priority);
        let envelope = Envelope::user(Some(self.addr()), req_id, msg);
        cell.try_enqueue(envelope)
            .map_err(|_| SendError::MailboxClosed)?;
        Ok(RequestId(req_id.response_id()))
    }

    /// Synchronous request with an expiry: if no response arrives within
    /// `timeout`, the sync-failure handler runs (or the actor exits with
    /// [`ExitReason::UnhandledSyncFailure`]).
    pub fn timed_sync_send(
        &mut self,
        dest: &ActorAddr,
        timeout: Duration,
        msg: Message,
    ) -> Result<RequestId, SendError> {
        let req = self.sync_send(dest, msg)?;
        self.cell.runtime.timer().schedule(
            timeout,
            self.addr(),
            Envelope::system(Payload::SyncTimeout(req.response_id())),
        );
        Ok(req)
    }

    /// Install `handler` as the front pending-response handler for `req`.
    pub fn await_response(&mut self, req: RequestId, handler: Behavior) {
        self.state.pending.push_front(req.response_id(), handler);
        self.state.behavior_changed = true;
    }

    /// Create a deferred reply handle for the request under dispatch.
    #[must_use]
    pub fn make_response_promise(&mut self) -> ResponsePromise {
        match &self.state.current {
            Some(envelope) => {
                let Some(sender) = &envelope.sender else {
                    return ResponsePromise::inert();
                };
                let mid = if envelope.mid.is_request() {
                    envelope.mid.response_id()
                } else {
                    MessageId::make(envelope.mid.priority())
                };
                ResponsePromise::new(self.addr(), sender.clone(), mid)
            }
            None => ResponsePromise::inert(),
        }
    }

    /// Typed variant of [`make_response_promise`](Self::make_response_promise).
    #[must_use]
    pub fn make_typed_response_promise<T: Send + Sync + 'static>(
        &mut self,
    ) -> TypedResponsePromise<T> {
        TypedResponsePromise::new(self.make_response_promise())
    }

    // ── Links and monitors ──────────────────────────────────────────

    /// Bidirectional link: both sides propagate exits to each other.
    /// Idempotent; self-links are rejected. Linking to an exited actor
    /// delivers an exit message immediately.
    pub fn link_to(&mut self, peer: &ActorAddr) {
        if *peer == self.addr() {
            debug!(actor = self.id(), "self-link rejected");
            return;
        }
        if !self.state.links.insert(peer.clone()) {
            return;
        }
        let request = Envelope::system(Payload::Link(self.addr()));
        let reason = match peer.upgrade() {
            Some(cell) => match cell.try_enqueue(request) {
                Ok(()) => return,
                Err(_) => cell.exit_reason(),
            },
            None => ExitReason::Normal,
        };
        // Peer already exited: the caller hears about it right away.
        self.cell.enqueue(Envelope::system(Payload::Exit(ExitMsg {
            source: peer.clone(),
            reason,
        })));
    }

    /// Remove a link, both locally and at the peer.
    pub fn unlink(&mut self, peer: &ActorAddr) {
        if self.state.links.remove(peer) {
            peer.deliver(Envelope::system(Payload::Unlink(self.addr())));
        }
    }

    /// Unidirectional monitor. Every call registers one independent down
    /// notification; monitoring an exited actor delivers it immediately.
    pub fn monitor(&mut self, target: &ActorAddr) {
        let request = Envelope::system(Payload::Monitor(self.addr()));
        let reason = match target.upgrade() {
            Some(cell) => match cell.try_enqueue(request) {
                Ok(()) => return,
                Err(_) => cell.exit_reason(),
            },
            None => ExitReason::Normal,
        };
        self.cell.enqueue(Envelope::system(Payload::Down(DownMsg {
            source: target.clone(),
            reason,
        })));
    }

    /// Remove at most one pending monitor registration on `target`.
    pub fn demonitor(&mut self, target: &ActorAddr) {
        target.deliver(Envelope::system(Payload::Demonitor(self.addr())));
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Finish execution after the current handler returns: clear the
    /// behavior stack, run `on_exit`, propagate exits and downs, run
    /// attachables, close the mailbox.
    pub fn quit(&mut self, reason: ExitReason) {
        self.state.planned_exit = Some(reason);
    }

    /// Enable or disable exit trapping. A trapping actor receives exit
    /// messages as ordinary dispatches and does not auto-exit.
    pub fn trap_exit(&mut self, on: bool) {
        self.state.trap_exit = on;
    }

    /// Whether this actor traps exit messages.
    #[must_use]
    pub fn is_trap_exit(&self) -> bool {
        self.state.trap_exit
    }

    /// Install the cleanup callback invoked by `quit`. Installing a new
    /// behavior from inside it cancels the exit.
    pub fn on_exit<F>(&mut self, hook: F)
    where
        F: FnMut(&mut LocalActor<'_>) + Send + 'static,
    {
        self.state.on_exit = Some(Box::new(hook));
    }

    /// Install the handler consulted when a synchronous request fails or
    /// expires.
    pub fn set_sync_failure_handler<F>(&mut self, hook: F)
    where
        F: FnMut(&mut LocalActor<'_>) + Send + 'static,
    {
        self.state.sync_failure = Some(Box::new(hook));
    }

    /// Map handler panics to an exit reason. Handlers added later win.
    pub fn set_exception_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&str) -> Option<ExitReason> + Send + 'static,
    {
        self.attach(Box::new(ExceptionHandler { f: handler }));
    }

    /// Attach a cleanup hook run at finalization.
    pub fn attach(&mut self, attachable: Box<dyn Attachable>) {
        self.state.attachables.push(attachable);
    }

    // ── Current element ─────────────────────────────────────────────

    /// The message under dispatch. Only set inside a handler.
    #[must_use]
    pub fn current_message(&self) -> Option<&Message> {
        match &self.state.current.as_ref()?.payload {
            Payload::User(msg) => Some(msg),
            _ => None,
        }
    }

    /// The sender of the message under dispatch, if it was sent from an
    /// actor context.
    #[must_use]
    pub fn current_sender(&self) -> Option<&ActorAddr> {
        self.state.current.as_ref()?.sender.as_ref()
    }

    // ── Spawning ────────────────────────────────────────────────────

    /// Spawn a cooperative actor.
    pub fn spawn<F>(&mut self, init: F) -> ActorHandle
    where
        F: FnOnce(&mut LocalActor<'_>) -> Behavior + Send + 'static,
    {
        self.spawn_opts(SpawnOptions::default(), init)
    }

    /// Spawn a cooperative actor with options. `link` and `monitor` are
    /// applied before the child runs, so no exit can be missed.
    pub fn spawn_opts<F>(&mut self, opts: SpawnOptions, init: F) -> ActorHandle
    where
        F: FnOnce(&mut LocalActor<'_>) -> Behavior + Send + 'static,
    {
        let links = if opts.link { vec![self.addr()] } else { Vec::new() };
        let monitors = if opts.monitor {
            vec![self.addr()]
        } else {
            Vec::new()
        };
        let handle =
            runtime::spawn_event_based(&self.cell.runtime, Box::new(init), links, monitors);
        if opts.link {
            self.state.links.insert(handle.addr());
        }
        handle
    }

    /// Spawn a thread-mapped actor running `body` on a dedicated thread.
    pub fn spawn_thread_mapped<F>(&mut self, body: F) -> ActorHandle
    where
        F: FnOnce(&mut LocalActor<'_>) + Send + 'static,
    {
        runtime::spawn_thread_mapped(
            &self.cell.runtime,
            Box::new(body),
            Vec::new(),
            Vec::new(),
        )
    }

    // ── Groups and names ────────────────────────────────────────────

    /// Subscribe to a group. Automatically unsubscribed at finalization.
    pub fn join(&mut self, group: &str) {
        if self.cell.runtime.groups().subscribe(group, self.addr()) {
            self.state.joined_groups.push(group.to_string());
        }
    }

    /// Leave a group.
    pub fn leave(&mut self, group: &str) {
        self.cell.runtime.groups().unsubscribe(group, &self.addr());
        self.state.joined_groups.retain(|g| g != group);
    }

    /// Send `msg` to every current member of `group`.
    pub fn publish(&mut self, group: &str, msg: Message) {
        let sender = self.addr();
        self.cell.runtime.groups().publish(group, Some(sender), &msg);
    }

    /// Claim a registry name. Returns `false` when the name is taken.
    /// Names are released at finalization.
    pub fn register(&mut self, name: &str) -> bool {
        if self.cell.runtime.registry().register(name, self.addr()) {
            self.state.registered_names.push(name.to_string());
            true
        } else {
            false
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
