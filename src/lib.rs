//! weft — a local actor runtime.
//!
//! Actors are isolated units of computation that communicate exclusively
//! by asynchronous messages. The runtime provides at-most-one-dequeue
//! semantics per message, FIFO delivery per sender pair, request
//! correlation with timeouts, and orderly termination with link/monitor
//! propagation.
//!
//! # Architecture
//!
//! ```text
//! Layer 0: message, message_id, error      (no internal deps)
//! Layer 1: mailbox, behavior, timeout      (envelopes, handlers)
//! Layer 2: addr, request                   (identities, correlation)
//! Layer 3: actor                           (dispatch, links, lifecycle)
//! Layer 4: scheduler, timer                (execution units)
//! Layer 5: registry, group, runtime        (shared services, spawn)
//! ```
//!
//! # Example
//!
//! ```
//! use weft::{message, Behavior, Handled, Runtime};
//!
//! let runtime = Runtime::new();
//! let incrementer = runtime.spawn(|_| {
//!     Behavior::new(|_, msg| match msg.get::<i32>(0) {
//!         Some(&n) => Handled::Reply(message![n + 1]),
//!         None => Handled::Skipped,
//!     })
//! });
//!
//! let caller = runtime.spawn_thread_mapped(move |me| {
//!     let req = me.sync_send(&incrementer.addr(), message![41_i32]).unwrap();
//!     me.receive_response(
//!         req,
//!         Behavior::new(|me, msg| {
//!             assert_eq!(msg.get::<i32>(0), Some(&42));
//!             me.quit(weft::ExitReason::Normal);
//!             Handled::Done
//!         }),
//!     )
//!     .ok();
//! });
//! # let _ = caller;
//! # std::thread::sleep(std::time::Duration::from_millis(200));
//! # runtime.shutdown();
//! ```

pub mod actor;
pub mod addr;
pub mod behavior;
pub mod error;
mod group;
mod mailbox;
pub mod message;
pub mod message_id;
mod registry;
pub mod request;
pub mod runtime;
pub mod scheduler;
mod timeout;
mod timer;

pub use actor::{Attachable, LocalActor};
pub use addr::{ActorAddr, ActorHandle, ActorId};
pub use behavior::{Behavior, Handled};
pub use error::{ExitReason, ForwardError, ReceiveError, SendError};
pub use message::{DownMsg, Element, ExitMsg, Message};
pub use message_id::{MessageId, MessagePriority};
pub use request::{RequestId, ResponsePromise, TypedResponsePromise};
pub use runtime::{Runtime, RuntimeConfig, RuntimeMetrics, SpawnOptions};
pub use scheduler::{Resumable, ResumeResult};
