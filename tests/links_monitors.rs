//! Link and monitor semantics: exit propagation, trapping, one down per
//! monitor registration, and handshakes with already-exited peers.

use std::sync::mpsc;
use std::time::Duration;

use weft::{message, Behavior, DownMsg, ExitMsg, ExitReason, Handled, Runtime, SpawnOptions};

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn exits_propagate_through_links_and_monitors() {
    let runtime = Runtime::new();
    let b = runtime.spawn(|_| Behavior::new(|_, _| Handled::Done));

    let (down_tx, down_rx) = mpsc::channel::<ExitReason>();
    let b_addr = b.addr();
    let _c = runtime.spawn(move |me| {
        me.monitor(&b_addr);
        let down_tx = down_tx.clone();
        Behavior::new(move |_, msg| {
            if let Some(down) = msg.get::<DownMsg>(0) {
                down_tx.send(down.reason).expect("report");
            }
            Handled::Done
        })
    });

    let b_addr = b.addr();
    let a = runtime.spawn(move |me| {
        me.link_to(&b_addr);
        Behavior::new(|me, _| {
            me.quit(ExitReason::User(7));
            Handled::Done
        })
    });
    a.send(message![()]);

    // B does not trap exits, so it adopts A's reason; the monitor on B
    // observes it.
    assert_eq!(down_rx.recv_timeout(WAIT), Ok(ExitReason::User(7)));
    runtime.shutdown();
}

#[test]
fn trapping_actors_receive_exits_as_ordinary_messages() {
    let runtime = Runtime::new();
    let b = runtime.spawn(|_| {
        Behavior::new(|me, msg| {
            if msg.is::<i32>(0) {
                me.quit(ExitReason::User(3));
            }
            Handled::Done
        })
    });

    let (alive_tx, alive_rx) = mpsc::channel::<&'static str>();
    let (exit_tx, exit_rx) = mpsc::channel::<ExitReason>();
    let b_addr = b.addr();
    let a = runtime.spawn(move |me| {
        me.trap_exit(true);
        me.link_to(&b_addr);
        // Trigger B from our own context so the link handshake lands
        // before the trigger.
        me.send(&b_addr, message![0_i32]);
        let exit_tx = exit_tx.clone();
        let alive_tx = alive_tx.clone();
        Behavior::new(move |_, msg| {
            if let Some(exit) = msg.get::<ExitMsg>(0) {
                exit_tx.send(exit.reason).expect("report");
            } else if msg.is::<&str>(0) {
                alive_tx.send("still-alive").expect("report");
            }
            Handled::Done
        })
    });

    assert_eq!(exit_rx.recv_timeout(WAIT), Ok(ExitReason::User(3)));
    // The trapped exit did not terminate A.
    a.send(message!["ping"]);
    assert_eq!(alive_rx.recv_timeout(WAIT), Ok("still-alive"));
    runtime.shutdown();
}

#[test]
fn each_monitor_call_yields_exactly_one_down() {
    let runtime = Runtime::new();
    let t = runtime.spawn(|_| {
        Behavior::new(|me, msg| {
            if msg.is::<i32>(0) {
                me.quit(ExitReason::User(1));
            }
            Handled::Done
        })
    });
    let (tx, rx) = mpsc::channel::<ExitReason>();
    let t_addr = t.addr();
    let _w = runtime.spawn(move |me| {
        me.monitor(&t_addr);
        me.monitor(&t_addr);
        me.send(&t_addr, message![0_i32]);
        let tx = tx.clone();
        Behavior::new(move |_, msg| {
            if let Some(down) = msg.get::<DownMsg>(0) {
                tx.send(down.reason).expect("report");
            }
            Handled::Done
        })
    });
    assert_eq!(rx.recv_timeout(WAIT), Ok(ExitReason::User(1)));
    assert_eq!(rx.recv_timeout(WAIT), Ok(ExitReason::User(1)));
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    runtime.shutdown();
}

#[test]
fn demonitor_removes_a_single_registration() {
    let runtime = Runtime::new();
    let t = runtime.spawn(|_| {
        Behavior::new(|me, msg| {
            if msg.is::<i32>(0) {
                me.quit(ExitReason::User(6));
            }
            Handled::Done
        })
    });
    let (tx, rx) = mpsc::channel::<ExitReason>();
    let t_addr = t.addr();
    let _w = runtime.spawn(move |me| {
        me.monitor(&t_addr);
        me.monitor(&t_addr);
        me.demonitor(&t_addr);
        me.send(&t_addr, message![0_i32]);
        let tx = tx.clone();
        Behavior::new(move |_, msg| {
            if let Some(down) = msg.get::<DownMsg>(0) {
                tx.send(down.reason).expect("report");
            }
            Handled::Done
        })
    });
    assert_eq!(rx.recv_timeout(WAIT), Ok(ExitReason::User(6)));
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    runtime.shutdown();
}

#[test]
fn unlink_undoes_a_link() {
    let runtime = Runtime::new();
    let (tx, rx) = mpsc::channel::<i32>();
    let b = runtime.spawn(move |_| {
        let tx = tx.clone();
        Behavior::new(move |_, msg| {
            if let Some(&n) = msg.get::<i32>(0) {
                tx.send(n).expect("report");
            }
            Handled::Done
        })
    });
    let b_addr = b.addr();
    let _a = runtime.spawn(move |me| {
        me.link_to(&b_addr);
        me.unlink(&b_addr);
        me.quit(ExitReason::User(11));
        Behavior::new(|_, _| Handled::Done)
    });

    // Give A's abnormal exit time to (wrongly) reach B, then prove B is
    // still dispatching.
    std::thread::sleep(Duration::from_millis(100));
    b.send(message![1_i32]);
    assert_eq!(rx.recv_timeout(WAIT), Ok(1));
    runtime.shutdown();
}

#[test]
fn duplicate_links_deliver_a_single_exit() {
    let runtime = Runtime::new();
    let (exit_tx, exit_rx) = mpsc::channel::<ExitReason>();
    let b = runtime.spawn(move |me| {
        me.trap_exit(true);
        let exit_tx = exit_tx.clone();
        Behavior::new(move |_, msg| {
            if let Some(exit) = msg.get::<ExitMsg>(0) {
                exit_tx.send(exit.reason).expect("report");
            }
            Handled::Done
        })
    });
    let b_addr = b.addr();
    let _a = runtime.spawn(move |me| {
        me.link_to(&b_addr);
        me.link_to(&b_addr);
        me.quit(ExitReason::User(2));
        Behavior::new(|_, _| Handled::Done)
    });
    assert_eq!(exit_rx.recv_timeout(WAIT), Ok(ExitReason::User(2)));
    assert!(exit_rx.recv_timeout(Duration::from_millis(300)).is_err());
    runtime.shutdown();
}

#[test]
fn linking_to_an_exited_actor_delivers_its_exit_reason() {
    let runtime = Runtime::new();
    let dead = runtime.spawn(|me| {
        me.quit(ExitReason::User(9));
        Behavior::new(|_, _| Handled::Done)
    });
    let dead_addr = dead.addr();
    let deadline = std::time::Instant::now() + WAIT;
    while dead_addr.is_alive() {
        assert!(std::time::Instant::now() < deadline, "actor did not exit");
        std::thread::sleep(Duration::from_millis(5));
    }

    let (tx, rx) = mpsc::channel::<ExitReason>();
    let _a = runtime.spawn(move |me| {
        me.trap_exit(true);
        me.link_to(&dead_addr);
        let tx = tx.clone();
        Behavior::new(move |_, msg| {
            if let Some(exit) = msg.get::<ExitMsg>(0) {
                tx.send(exit.reason).expect("report");
            }
            Handled::Done
        })
    });
    assert_eq!(rx.recv_timeout(WAIT), Ok(ExitReason::User(9)));
    runtime.shutdown();
}

#[test]
fn spawn_linked_children_propagate_their_exit() {
    let runtime = Runtime::new();
    let (tx, rx) = mpsc::channel::<ExitReason>();
    let _parent = runtime.spawn(move |me| {
        me.trap_exit(true);
        me.spawn_opts(
            SpawnOptions {
                link: true,
                monitor: false,
            },
            |me| {
                me.quit(ExitReason::User(4));
                Behavior::new(|_, _| Handled::Done)
            },
        );
        let tx = tx.clone();
        Behavior::new(move |_, msg| {
            if let Some(exit) = msg.get::<ExitMsg>(0) {
                tx.send(exit.reason).expect("report");
            }
            Handled::Done
        })
    });
    assert_eq!(rx.recv_timeout(WAIT), Ok(ExitReason::User(4)));
    runtime.shutdown();
}

#[test]
fn send_exit_respects_normal_reason_semantics() {
    let runtime = Runtime::new();
    let (tx, rx) = mpsc::channel::<i32>();
    let victim = runtime.spawn(move |_| {
        let tx = tx.clone();
        Behavior::new(move |_, msg| {
            if let Some(&n) = msg.get::<i32>(0) {
                tx.send(n).expect("report");
            }
            Handled::Done
        })
    });
    let victim_addr = victim.addr();
    let _sender = runtime.spawn(move |me| {
        // A normal-reason exit message is ignored by non-trapping
        // actors.
        me.send_exit(&victim_addr, ExitReason::Normal);
        me.send(&victim_addr, message![1_i32]);
        Behavior::new(|_, _| Handled::Done)
    });
    assert_eq!(rx.recv_timeout(WAIT), Ok(1));
    runtime.shutdown();
}
