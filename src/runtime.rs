//! Runtime handle: configuration, spawn factory, and shared services.
//!
//! A [`Runtime`] owns the worker pool, the timer thread, the name
//! registry, and the group registry. Actors hold the core through their
//! cell, so a runtime's services stay alive as long as any of its actors
//! does. Ids come from a per-runtime counter; there is no process-wide
//! state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use crate::actor::{ActorCell, DispatchState, ExecKind, InitFn, LocalActor};
use crate::addr::{ActorHandle, ActorId};
use crate::behavior::Behavior;
use crate::group::GroupRegistry;
use crate::message::Message;
use crate::registry::NameRegistry;
use crate::scheduler::SchedulerCore;
use crate::timer::TimerCore;

/// Upper bound on the worker pool size.
const MAX_WORKERS: usize = 256;
/// Default messages per `resume` invocation.
const DEFAULT_THROUGHPUT: usize = 256;

// ── Configuration ───────────────────────────────────────────────────────

/// Pool sizing and dispatch throughput.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Worker threads in the cooperative pool.
    pub workers: usize,
    /// Maximum messages one `resume` dispatches before yielding the
    /// worker.
    pub throughput: usize,
}

fn env_override(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(value) => match value.parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => {
                warn!("ignoring invalid {name}={value}");
                default
            }
        },
        Err(_) => default,
    }
}

impl Default for RuntimeConfig {
    /// One worker per core (overridable via `WEFT_WORKERS`), default
    /// throughput (overridable via `WEFT_THROUGHPUT`).
    fn default() -> Self {
        let cores = thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4);
        Self {
            workers: env_override("WEFT_WORKERS", cores).clamp(1, MAX_WORKERS),
            throughput: env_override("WEFT_THROUGHPUT", DEFAULT_THROUGHPUT),
        }
    }
}

// ── Spawn options ───────────────────────────────────────────────────────

/// Options for [`LocalActor::spawn_opts`].
///
/// `link` and `monitor` are applied before the child processes its first
/// message, so the relation cannot miss an exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpawnOptions {
    /// Link the spawner and the child bidirectionally.
    pub link: bool,
    /// Register one monitor of the child for the spawner.
    pub monitor: bool,
}

// ── Core ────────────────────────────────────────────────────────────────

/// Shared services reachable from every actor cell.
pub(crate) struct RuntimeCore {
    scheduler: Arc<SchedulerCore>,
    timer: Arc<TimerCore>,
    registry: NameRegistry,
    groups: GroupRegistry,
    next_id: AtomicU64,
    actors_spawned: AtomicU64,
    messages_dispatched: AtomicU64,
}

impl RuntimeCore {
    pub(crate) fn scheduler(&self) -> &SchedulerCore {
        &self.scheduler
    }

    pub(crate) fn timer(&self) -> &TimerCore {
        &self.timer
    }

    pub(crate) fn registry(&self) -> &NameRegistry {
        &self.registry
    }

    pub(crate) fn groups(&self) -> &GroupRegistry {
        &self.groups
    }

    pub(crate) fn next_actor_id(&self) -> ActorId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn note_dispatch(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    }
}

/// Spawn a cooperative actor: build its cell, mark it runnable, and hand
/// it to the pool so `init` runs promptly.
pub(crate) fn spawn_event_based(
    core: &Arc<RuntimeCore>,
    init: InitFn,
    links: Vec<crate::ActorAddr>,
    monitors: Vec<crate::ActorAddr>,
) -> ActorHandle {
    let id = core.next_actor_id();
    core.actors_spawned.fetch_add(1, Ordering::Relaxed);
    let cell = ActorCell::new(
        id,
        ExecKind::Cooperative,
        Arc::clone(core),
        DispatchState::new(Some(init), links, monitors),
    );
    debug!(actor = id, "spawned");
    cell.launch();
    ActorHandle::new(cell)
}

/// Spawn a thread-mapped actor on its own named OS thread.
pub(crate) fn spawn_thread_mapped(
    core: &Arc<RuntimeCore>,
    body: Box<dyn FnOnce(&mut LocalActor<'_>) + Send>,
    links: Vec<crate::ActorAddr>,
    monitors: Vec<crate::ActorAddr>,
) -> ActorHandle {
    let id = core.next_actor_id();
    core.actors_spawned.fetch_add(1, Ordering::Relaxed);
    let cell = ActorCell::new(
        id,
        ExecKind::ThreadMapped,
        Arc::clone(core),
        DispatchState::new(None, links, monitors),
    );
    debug!(actor = id, "spawned (thread-mapped)");
    let handle = ActorHandle::new(Arc::clone(&cell));
    let thread_cell = Arc::clone(&cell);
    let spawned = thread::Builder::new()
        .name(format!("weft-actor-{id}"))
        .spawn(move || thread_cell.run_thread_mapped(body));
    if spawned.is_err() {
        warn!(actor = id, "failed to spawn actor thread");
    }
    handle
}

// ── Runtime handle ──────────────────────────────────────────────────────

/// Counter snapshot for observability.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeMetrics {
    /// Actors spawned since startup.
    pub actors_spawned: u64,
    /// Messages dispatched across all actors.
    pub messages_dispatched: u64,
    /// Jobs submitted to the worker pool.
    pub jobs_scheduled: u64,
    /// Resume invocations completed by workers.
    pub jobs_completed: u64,
    /// Successful steals between workers.
    pub steals: u64,
}

/// Owner of one actor runtime instance.
///
/// Dropping the handle shuts the pool and timer down; actors already
/// running finish their current dispatch but are no longer scheduled.
pub struct Runtime {
    core: Arc<RuntimeCore>,
    stopped: AtomicBool,
}

impl Runtime {
    /// Start a runtime with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Start a runtime with an explicit configuration.
    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        let core = Arc::new(RuntimeCore {
            scheduler: SchedulerCore::start(config.workers, config.throughput.max(1)),
            timer: TimerCore::start(),
            registry: NameRegistry::new(),
            groups: GroupRegistry::new(),
            next_id: AtomicU64::new(1),
            actors_spawned: AtomicU64::new(0),
            messages_dispatched: AtomicU64::new(0),
        });
        Self {
            core,
            stopped: AtomicBool::new(false),
        }
    }

    pub(crate) fn core(&self) -> &Arc<RuntimeCore> {
        &self.core
    }

    /// Spawn a cooperative actor. `init` runs as the actor's first
    /// activation and returns its initial behavior.
    pub fn spawn<F>(&self, init: F) -> ActorHandle
    where
        F: FnOnce(&mut LocalActor<'_>) -> Behavior + Send + 'static,
    {
        spawn_event_based(&self.core, Box::new(init), Vec::new(), Vec::new())
    }

    /// Spawn a thread-mapped actor: `body` runs on a dedicated thread
    /// and may use blocking receive.
    pub fn spawn_thread_mapped<F>(&self, body: F) -> ActorHandle
    where
        F: FnOnce(&mut LocalActor<'_>) + Send + 'static,
    {
        spawn_thread_mapped(&self.core, Box::new(body), Vec::new(), Vec::new())
    }

    /// Resolve a registered name to a live actor.
    #[must_use]
    pub fn whereis(&self, name: &str) -> Option<ActorHandle> {
        let addr = self.core.registry.whereis(name)?;
        addr.upgrade().map(ActorHandle::new)
    }

    /// Send `msg` to every member of `group`.
    pub fn publish(&self, group: &str, msg: Message) {
        self.core.groups.publish(group, None, &msg);
    }

    /// Snapshot the runtime counters.
    #[must_use]
    pub fn metrics(&self) -> RuntimeMetrics {
        RuntimeMetrics {
            actors_spawned: self.core.actors_spawned.load(Ordering::Relaxed),
            messages_dispatched: self.core.messages_dispatched.load(Ordering::Relaxed),
            jobs_scheduled: self.core.scheduler.jobs_scheduled.load(Ordering::Relaxed),
            jobs_completed: self.core.scheduler.jobs_completed.load(Ordering::Relaxed),
            steals: self.core.scheduler.steals.load(Ordering::Relaxed),
        }
    }

    /// Stop the worker pool and the timer. Idempotent; called from
    /// `Drop` as well. Thread-mapped actors are not interrupted.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.core.scheduler.shutdown();
        self.core.timer.shutdown();
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::Handled;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn spawned_actor_processes_messages() {
        let runtime = Runtime::new();
        let (tx, rx) = mpsc::channel::<i32>();
        let actor = runtime.spawn(move |_| {
            let tx = tx.clone();
            Behavior::new(move |_, msg| {
                if let Some(&n) = msg.get::<i32>(0) {
                    tx.send(n * 2).expect("report");
                }
                Handled::Done
            })
        });
        actor.send(crate::message![21_i32]);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(42));
        runtime.shutdown();
    }

    #[test]
    fn register_and_whereis_round_trip() {
        let runtime = Runtime::new();
        let (tx, rx) = mpsc::channel::<bool>();
        let actor = runtime.spawn(move |me| {
            tx.send(me.register("answering-machine")).expect("report");
            Behavior::new(|_, _| Handled::Done)
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(true));
        let resolved = runtime.whereis("answering-machine").expect("registered");
        assert_eq!(resolved.id(), actor.id());
        assert!(runtime.whereis("unknown").is_none());
        runtime.shutdown();
    }

    #[test]
    fn metrics_observe_activity() {
        let runtime = Runtime::new();
        let (tx, rx) = mpsc::channel::<()>();
        let actor = runtime.spawn(move |_| {
            let tx = tx.clone();
            Behavior::new(move |_, _| {
                tx.send(()).expect("report");
                Handled::Done
            })
        });
        actor.send(crate::message![1_i32]);
        rx.recv_timeout(Duration::from_secs(5)).expect("dispatch");
        let metrics = runtime.metrics();
        assert!(metrics.actors_spawned >= 1);
        assert!(metrics.messages_dispatched >= 1);
        assert!(metrics.jobs_scheduled >= 1);
        runtime.shutdown();
    }

    #[test]
    fn config_env_overrides_reject_garbage() {
        // Unset variables fall back to defaults.
        let config = RuntimeConfig::default();
        assert!(config.workers >= 1);
        assert!(config.throughput >= 1);
    }
}
