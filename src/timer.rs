//! Deadline timer backing delayed sends and timeout messages.
//!
//! A single thread owns a deadline-ordered heap. Firing an entry is an
//! ordinary enqueue at the target, so delivery, ordering, and closed
//! mailboxes are handled by the normal send machinery. Entries cannot be
//! cancelled; stale timeout ids are invalidated logically at the
//! receiver.
//!
//! Zero-delay submissions bypass the thread and enqueue inline, making
//! them indistinguishable from an immediate send for any sender pair.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::addr::ActorAddr;
use crate::mailbox::Envelope;

struct TimerEntry {
    deadline: Instant,
    /// Tie-breaker keeping same-deadline entries in submission order.
    seq: u64,
    target: ActorAddr,
    envelope: Box<Envelope>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest
        // deadline on top.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerState {
    queue: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

/// The timer thread's shared state.
pub(crate) struct TimerCore {
    state: Mutex<TimerState>,
    cond: Condvar,
    shutdown: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerCore {
    pub(crate) fn start() -> Arc<Self> {
        let core = Arc::new(Self {
            state: Mutex::new(TimerState {
                queue: BinaryHeap::new(),
                next_seq: 0,
            }),
            cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            handle: Mutex::new(None),
        });
        let thread_core = Arc::clone(&core);
        if let Ok(handle) = std::thread::Builder::new()
            .name("weft-timer".to_string())
            .spawn(move || timer_loop(&thread_core))
        {
            *core
                .handle
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }
        core
    }

    /// Deliver `envelope` to `target` after `delay`.
    pub(crate) fn schedule(&self, delay: Duration, target: ActorAddr, envelope: Box<Envelope>) {
        if delay.is_zero() {
            target.deliver(envelope);
            return;
        }
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.next_seq += 1;
        let entry = TimerEntry {
            deadline: Instant::now() + delay,
            seq: state.next_seq,
            target,
            envelope,
        };
        state.queue.push(entry);
        drop(state);
        self.cond.notify_one();
    }

    /// Stop the thread; pending entries are dropped.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.cond.notify_one();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn timer_loop(core: &TimerCore) {
    let mut guard = core
        .state
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    loop {
        if core.shutdown.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        let next_deadline = guard.queue.peek().map(|entry| entry.deadline);
        match next_deadline {
            None => {
                guard = core
                    .cond
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Some(deadline) if deadline <= now => {
                if let Some(entry) = guard.queue.pop() {
                    drop(guard);
                    entry.target.deliver(entry.envelope);
                    guard = core
                        .state
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(now);
                guard = core
                    .cond
                    .wait_timeout(guard, wait)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{Behavior, Handled};
    use crate::runtime::Runtime;
    use std::sync::mpsc;

    #[test]
    fn delayed_entries_fire_in_deadline_order() {
        let runtime = Runtime::new();
        let (tx, rx) = mpsc::channel::<i32>();
        let echo = runtime.spawn(move |_| {
            let tx = tx.clone();
            Behavior::new(move |_, msg| {
                if let Some(&n) = msg.get::<i32>(0) {
                    tx.send(n).expect("report");
                }
                Handled::Done
            })
        });
        let driver_target = echo.addr();
        let driver = runtime.spawn(move |me| {
            me.delayed_send(
                &driver_target,
                Duration::from_millis(40),
                crate::message![2_i32],
            );
            me.delayed_send(
                &driver_target,
                Duration::from_millis(10),
                crate::message![1_i32],
            );
            Behavior::new(|_, _| Handled::Done)
        });
        let _ = driver;
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(1));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(2));
        runtime.shutdown();
    }
}
