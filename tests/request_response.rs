//! Request/response correlation: round trips, out-of-order responses,
//! sync timeouts, error answers, and deferred replies.

use std::sync::mpsc;
use std::time::Duration;

use weft::{
    message, ActorHandle, Behavior, DownMsg, ExitReason, Handled, ResponsePromise, Runtime,
    SendError,
};

const WAIT: Duration = Duration::from_secs(5);

fn incrementer(runtime: &Runtime) -> ActorHandle {
    runtime.spawn(|_| {
        Behavior::new(|_, msg| match msg.get::<i32>(0) {
            Some(&n) => Handled::Reply(message![n + 1]),
            None => Handled::Skipped,
        })
    })
}

#[test]
fn sync_send_round_trips_through_the_responder() {
    let runtime = Runtime::new();
    let echo = incrementer(&runtime);
    let (tx, rx) = mpsc::channel::<i32>();
    let echo_addr = echo.addr();
    let _caller = runtime.spawn(move |me| {
        let req = me.sync_send(&echo_addr, message![41_i32]).expect("send");
        let tx = tx.clone();
        me.await_response(
            req,
            Behavior::new(move |_, msg| {
                tx.send(*msg.get::<i32>(0).expect("payload")).expect("report");
                Handled::Done
            }),
        );
        Behavior::new(|_, _| Handled::Done)
    });
    assert_eq!(rx.recv_timeout(WAIT), Ok(42));
    runtime.shutdown();
}

#[test]
fn request_ids_are_strictly_increasing_per_actor() {
    let runtime = Runtime::new();
    let sink = runtime.spawn(|_| Behavior::new(|_, _| Handled::Done));
    let sink_addr = sink.addr();
    let (tx, rx) = mpsc::channel::<(u64, u64)>();
    let _probe = runtime.spawn(move |me| {
        let a = me.sync_send(&sink_addr, message![1_i32]).expect("send");
        let b = me.sync_send(&sink_addr, message![2_i32]).expect("send");
        assert!(a.response_id().is_response());
        tx.send((a.response_id().sequence(), b.response_id().sequence()))
            .expect("report");
        Behavior::new(|_, _| Handled::Done)
    });
    let (a, b) = rx.recv_timeout(WAIT).expect("sequences");
    assert!(a >= 1);
    assert!(b > a);
    runtime.shutdown();
}

#[test]
fn out_of_order_responses_wait_for_their_turn() {
    let runtime = Runtime::new();
    let (tx, rx) = mpsc::channel::<&'static str>();

    // The peer stashes the reply to the first request and answers the
    // second request first.
    let peer = runtime.spawn(|_| {
        let mut stashed: Option<ResponsePromise> = None;
        Behavior::new(move |me, msg| {
            match msg.get::<i32>(0) {
                Some(&1) => stashed = Some(me.make_response_promise()),
                Some(&2) => {
                    let second = me.make_response_promise();
                    second.deliver(message!["second"]);
                    if let Some(first) = stashed.take() {
                        first.deliver(message!["first"]);
                    }
                }
                _ => {}
            }
            Handled::Done
        })
    });

    let peer_addr = peer.addr();
    let _caller = runtime.spawn(move |me| {
        let r1 = me.sync_send(&peer_addr, message![1_i32]).expect("r1");
        let r2 = me.sync_send(&peer_addr, message![2_i32]).expect("r2");
        // The front pending entry is the most recently awaited, so r1's
        // handler is installed last to be served first.
        let tx_r2 = tx.clone();
        me.await_response(
            r2,
            Behavior::new(move |_, msg| {
                assert_eq!(msg.get::<&str>(0), Some(&"second"));
                tx_r2.send("r2-handler").expect("report");
                Handled::Done
            }),
        );
        let tx_r1 = tx.clone();
        me.await_response(
            r1,
            Behavior::new(move |_, msg| {
                assert_eq!(msg.get::<&str>(0), Some(&"first"));
                tx_r1.send("r1-handler").expect("report");
                Handled::Done
            }),
        );
        Behavior::new(|_, _| Handled::Done)
    });

    // The r2 response arrives first but is cached until r1 completed.
    assert_eq!(rx.recv_timeout(WAIT), Ok("r1-handler"));
    assert_eq!(rx.recv_timeout(WAIT), Ok("r2-handler"));
    runtime.shutdown();
}

#[test]
fn timed_sync_send_runs_the_sync_failure_handler_on_expiry() {
    let runtime = Runtime::new();
    let blackhole = runtime.spawn(|_| Behavior::new(|_, _| Handled::Done));
    let (tx, rx) = mpsc::channel::<&'static str>();
    let target = blackhole.addr();
    let _caller = runtime.spawn(move |me| {
        let tx = tx.clone();
        me.set_sync_failure_handler(move |_| {
            tx.send("sync-failure").expect("report");
        });
        let req = me
            .timed_sync_send(&target, Duration::from_millis(20), message![1_i32])
            .expect("send");
        me.await_response(req, Behavior::new(|_, _| Handled::Done));
        Behavior::new(|_, _| Handled::Done)
    });
    assert_eq!(rx.recv_timeout(WAIT), Ok("sync-failure"));
    runtime.shutdown();
}

#[test]
fn unanswered_timed_sync_send_exits_the_requester() {
    let runtime = Runtime::new();
    let blackhole = runtime.spawn(|_| Behavior::new(|_, _| Handled::Done));
    let target = blackhole.addr();
    let caller = runtime.spawn(move |me| {
        let req = me
            .timed_sync_send(&target, Duration::from_millis(20), message![1_i32])
            .expect("send");
        me.await_response(req, Behavior::new(|_, _| Handled::Done));
        Behavior::new(|_, _| Handled::Done)
    });
    let (tx, rx) = mpsc::channel::<ExitReason>();
    let caller_addr = caller.addr();
    let _watcher = runtime.spawn(move |me| {
        me.monitor(&caller_addr);
        let tx = tx.clone();
        Behavior::new(move |_, msg| {
            if let Some(down) = msg.get::<DownMsg>(0) {
                tx.send(down.reason).expect("report");
            }
            Handled::Done
        })
    });
    assert_eq!(
        rx.recv_timeout(WAIT),
        Ok(ExitReason::UnhandledSyncFailure)
    );
    runtime.shutdown();
}

#[test]
fn requests_stranded_at_exit_are_answered_with_an_error() {
    let runtime = Runtime::new();
    // The target never matches requests; they sit in its cache until it
    // quits, at which point finalization answers them.
    let target = runtime.spawn(|_| {
        Behavior::new(|me, msg| {
            if msg.is::<&str>(0) {
                me.quit(ExitReason::User(5));
                return Handled::Done;
            }
            Handled::Skipped
        })
    });
    let (tx, rx) = mpsc::channel::<&'static str>();
    let target_addr = target.addr();
    let _caller = runtime.spawn(move |me| {
        let tx = tx.clone();
        me.set_sync_failure_handler(move |_| {
            tx.send("failed").expect("report");
        });
        let req = me.sync_send(&target_addr, message![1_i32]).expect("send");
        me.await_response(req, Behavior::new(|_, _| Handled::Done));
        me.send(&target_addr, message!["quit"]);
        Behavior::new(|_, _| Handled::Done)
    });
    assert_eq!(rx.recv_timeout(WAIT), Ok("failed"));
    runtime.shutdown();
}

#[test]
fn sync_send_to_an_exited_actor_fails_synchronously() {
    let runtime = Runtime::new();
    let doomed = runtime.spawn(|me| {
        me.quit(ExitReason::Normal);
        Behavior::new(|_, _| Handled::Done)
    });
    let addr = doomed.addr();
    let deadline = std::time::Instant::now() + WAIT;
    while addr.is_alive() {
        assert!(std::time::Instant::now() < deadline, "actor did not exit");
        std::thread::sleep(Duration::from_millis(5));
    }

    let (tx, rx) = mpsc::channel::<Result<(), SendError>>();
    let _prober = runtime.spawn(move |me| {
        let result = me.sync_send(&addr, message![1_i32]).map(|_| ());
        tx.send(result).expect("report");
        Behavior::new(|_, _| Handled::Done)
    });
    assert_eq!(rx.recv_timeout(WAIT), Ok(Err(SendError::MailboxClosed)));
    runtime.shutdown();
}

#[test]
fn response_promises_can_be_delivered_by_another_actor() {
    let runtime = Runtime::new();
    let worker = runtime.spawn(|_| {
        Behavior::new(|_, msg| {
            if let Some(promise) = msg.get::<ResponsePromise>(0) {
                promise.clone().deliver(message![99_i32]);
            }
            Handled::Done
        })
    });
    let worker_addr = worker.addr();
    let front = runtime.spawn(move |_| {
        Behavior::new(move |me, msg| {
            if msg.is::<i32>(0) {
                let promise = me.make_response_promise();
                assert!(promise.pending());
                me.send(&worker_addr, message![promise]);
            }
            Handled::Done
        })
    });
    let (tx, rx) = mpsc::channel::<i32>();
    let front_addr = front.addr();
    let _caller = runtime.spawn(move |me| {
        let req = me.sync_send(&front_addr, message![7_i32]).expect("send");
        let tx = tx.clone();
        me.await_response(
            req,
            Behavior::new(move |_, msg| {
                tx.send(*msg.get::<i32>(0).expect("value")).expect("report");
                Handled::Done
            }),
        );
        Behavior::new(|_, _| Handled::Done)
    });
    assert_eq!(rx.recv_timeout(WAIT), Ok(99));
    runtime.shutdown();
}

#[test]
fn typed_promises_deliver_a_single_value() {
    let runtime = Runtime::new();
    let responder = runtime.spawn(|_| {
        Behavior::new(|me, msg| {
            if msg.is::<i32>(0) {
                let promise = me.make_typed_response_promise::<String>();
                promise.deliver("pong".to_string());
            }
            Handled::Done
        })
    });
    let (tx, rx) = mpsc::channel::<String>();
    let responder_addr = responder.addr();
    let _caller = runtime.spawn(move |me| {
        let req = me.sync_send(&responder_addr, message![0_i32]).expect("send");
        let tx = tx.clone();
        me.await_response(
            req,
            Behavior::new(move |_, msg| {
                tx.send(msg.get::<String>(0).expect("value").clone())
                    .expect("report");
                Handled::Done
            }),
        );
        Behavior::new(|_, _| Handled::Done)
    });
    assert_eq!(rx.recv_timeout(WAIT), Ok("pong".to_string()));
    runtime.shutdown();
}

#[test]
fn thread_mapped_actor_blocks_for_a_response() {
    let runtime = Runtime::new();
    let echo = incrementer(&runtime);
    let (tx, rx) = mpsc::channel::<i32>();
    let echo_addr = echo.addr();
    let _tm = runtime.spawn_thread_mapped(move |me| {
        let req = me.sync_send(&echo_addr, message![9_i32]).expect("send");
        let tx = tx.clone();
        me.receive_response(
            req,
            Behavior::new(move |_, msg| {
                tx.send(*msg.get::<i32>(0).expect("value")).expect("report");
                Handled::Done
            }),
        )
        .expect("response");
    });
    assert_eq!(rx.recv_timeout(WAIT), Ok(10));
    runtime.shutdown();
}
