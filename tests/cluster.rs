//! End-to-end cluster scenarios, one per §8 of the design: real TCP
//! connections on localhost between processes sharing a single
//! `LocalSet`, the way `fantoch`'s own `run_test_with_inspect_fun` wires up
//! a cluster for its protocol tests.

use skein::{bootstrap, Config, Location, ProcessId, Runtime, ThunkError, Value};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

type BoxFuture = Pin<Box<dyn Future<Output = Result<Value, ThunkError>>>>;

fn add_one(_rt: Runtime, args: Vec<Value>) -> BoxFuture {
    Box::pin(async move {
        match args.into_iter().next() {
            Some(Value::Int(x)) => Ok(Value::Int(x + 1)),
            _ => Err(ThunkError::new("add_one expects a single int argument")),
        }
    })
}

fn square(_rt: Runtime, args: Vec<Value>) -> BoxFuture {
    Box::pin(async move {
        match args.into_iter().next() {
            Some(Value::Int(x)) => Ok(Value::Int(x * x)),
            _ => Err(ThunkError::new("square expects a single int argument")),
        }
    })
}

fn boom(_rt: Runtime, _args: Vec<Value>) -> BoxFuture {
    Box::pin(async move { Err(ThunkError::new("boom")) })
}

/// Fetches its one argument through to the value it names -- used to make a
/// process dereference a handle it was merely handed, not one it created.
fn deref_arg(_rt: Runtime, args: Vec<Value>) -> BoxFuture {
    Box::pin(async move {
        match args.into_iter().next() {
            Some(Value::Handle(h)) => Ok(h.fetch().await),
            Some(other) => Ok(other),
            None => Err(ThunkError::new("deref_arg requires one argument")),
        }
    })
}

fn slow_add_one(_rt: Runtime, args: Vec<Value>) -> BoxFuture {
    Box::pin(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        match args.into_iter().next() {
            Some(Value::Int(x)) => Ok(Value::Int(x + 1)),
            _ => Err(ThunkError::new("slow_add_one expects a single int argument")),
        }
    })
}

/// Calls `slow_add_one` on `target` and awaits it from inside its own
/// thunk -- the one suspension point the design allows (§4.2, §5).
fn relay(rt: Runtime, args: Vec<Value>) -> BoxFuture {
    Box::pin(async move {
        let mut it = args.into_iter();
        let target = match it.next() {
            Some(Value::Int(t)) => t as ProcessId,
            _ => return Err(ThunkError::new("relay expects (target, value)")),
        };
        let x = match it.next() {
            Some(v) => v,
            None => return Err(ThunkError::new("relay expects (target, value)")),
        };
        let handle = rt.remote_call(target, "slow_add_one", vec![x]);
        Ok(handle.fetch().await)
    })
}

fn install_test_functions(rt: &Runtime) {
    rt.register("add_one", add_one);
    rt.register("square", square);
    rt.register("boom", boom);
    rt.register("deref_arg", deref_arg);
    rt.register("slow_add_one", slow_add_one);
    rt.register("relay", relay);
}

/// Binds `n` ephemeral ports, wires up a `Locations` table, and connects all
/// `n` processes to each other via `bootstrap` (§4.8). Every process also
/// gets the test function table registered.
async fn spawn_cluster(n: u32) -> Vec<Runtime> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let mut locations = skein::Locations::default();
    for id in 0..n {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral port");
        let port = listener.local_addr().expect("local_addr").port();
        drop(listener);
        locations.insert(id, Location::new("127.0.0.1".parse().unwrap(), port));
    }

    let runtimes: Vec<Runtime> = (0..n)
        .map(|id| {
            let rt = Runtime::new(id, Config::new(n as usize));
            install_test_functions(&rt);
            rt
        })
        .collect();

    let mut joins = Vec::with_capacity(runtimes.len());
    for rt in &runtimes {
        let rt = rt.clone();
        let locations = locations.clone();
        joins.push(tokio::task::spawn_local(async move {
            bootstrap(&rt, locations).await.expect("bootstrap failed");
        }));
    }
    for join in joins {
        join.await.expect("bootstrap task panicked");
    }
    runtimes
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// S1: a call, a fetch, and the owner's registry converging to empty once
/// the handle is dropped.
#[tokio::test(flavor = "current_thread")]
async fn s1_call_fetch_and_gc() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let procs = spawn_cluster(3).await;
            let caller = &procs[1];
            let owner = &procs[2];

            let handle = caller.remote_call(2, "add_one", vec![Value::Int(41)]);
            let rid = handle.rid();
            settle().await;
            assert!(owner.has_pending(rid));

            let result = handle.fetch().await;
            match result {
                Value::Int(42) => {}
                other => panic!("expected 42, got {other:?}"),
            }

            drop(handle);
            settle().await;
            assert!(!owner.has_pending(rid), "owner should have dropped the item");
        })
        .await;
}

/// S2: a round-robin fan-out over three workers, each fetched independently.
#[tokio::test(flavor = "current_thread")]
async fn s2_round_robin_fan_out() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let procs = spawn_cluster(4).await;
            let caller = &procs[0];
            let inputs = [10i64, 20, 30];
            let targets: [ProcessId; 3] = [1, 2, 3];

            let handles: Vec<_> = inputs
                .iter()
                .zip(targets.iter())
                .map(|(&x, &target)| caller.remote_call(target, "square", vec![Value::Int(x)]))
                .collect();

            let mut results = Vec::new();
            for handle in handles {
                match handle.fetch().await {
                    Value::Int(v) => results.push(v),
                    other => panic!("expected int, got {other:?}"),
                }
            }
            assert_eq!(results, vec![100, 400, 900]);
        })
        .await;
}

/// S3: a handle produced by one process, forwarded as an argument to
/// another, which dereferences it itself; client-set convergence once both
/// sides drop their handle.
#[tokio::test(flavor = "current_thread")]
async fn s3_handle_forwarding() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let procs = spawn_cluster(4).await;

            let r = procs[1].remote_call(2, "add_one", vec![Value::Int(9)]);
            let rid = r.rid();
            r.sync().await;
            assert!(procs[2].has_pending(rid));

            let forwarded = procs[1].remote_call(3, "deref_arg", vec![Value::Handle(r.clone())]);
            match forwarded.fetch().await {
                Value::Int(10) => {}
                other => panic!("expected 10, got {other:?}"),
            }

            drop(forwarded);
            drop(r);
            settle().await;
            assert!(
                !procs[2].has_pending(rid),
                "owner's registry should converge to empty once every client drops"
            );
        })
        .await;
}

/// S4: a thunk failure is delivered as the fetched value, not a hang.
#[tokio::test(flavor = "current_thread")]
async fn s4_thunk_failure_propagates() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let procs = spawn_cluster(3).await;
            let handle = procs[1].remote_call(2, "boom", Vec::new());
            match handle.fetch().await {
                Value::Error(e) => assert_eq!(e.message, "boom"),
                other => panic!("expected an Error value, got {other:?}"),
            }
        })
        .await;
}

/// S5: a thunk that awaits a remote identifier suspends without blocking
/// the event loop -- other work on the same process still completes first.
#[tokio::test(flavor = "current_thread")]
async fn s5_suspended_task_resumption() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let procs = spawn_cluster(3).await;

            // process 1 relays to process 2's slow thunk...
            let slow = procs[1].remote_call(1, "relay", vec![Value::Int(2), Value::Int(10)]);
            // ...while a plain local call on process 1 is free to run and
            // finish first, proving the relay's suspension didn't block it.
            let fast = procs[1].remote_call(1, "add_one", vec![Value::Int(1)]);

            match fast.fetch().await {
                Value::Int(2) => {}
                other => panic!("expected 2, got {other:?}"),
            }
            match slow.fetch().await {
                Value::Int(11) => {}
                other => panic!("expected 11, got {other:?}"),
            }
        })
        .await;
}

/// S6: global-object construction leaves every process's peer table
/// populated with its siblings.
#[tokio::test(flavor = "current_thread")]
async fn s6_global_object_construction() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let procs = spawn_cluster(3).await;
            let all: Vec<ProcessId> = (0..3).collect();
            skein::create_global_object(&procs[0], &all).await;
            settle().await;

            for rt in &procs {
                assert_eq!(
                    rt.global_object_peer_count(),
                    2,
                    "process {} should see its two siblings",
                    rt.me()
                );
            }

            // §4.7's wire shortcut: process 2 already holds its own
            // instance, so receiving process 1's handle to *its* instance
            // must not register process 1 as a client of process 2's.
            let before = procs[2]
                .global_object_clients()
                .expect("process 2 constructed its own instance");
            assert!(
                !before.contains(&1),
                "process 2 should not start out with process 1 as a client"
            );

            let handle1 = procs[1]
                .global_object_handle()
                .expect("process 1 constructed its own instance");
            let forwarded = procs[1].remote_call(2, "deref_arg", vec![Value::Handle(handle1)]);
            match forwarded.fetch().await {
                Value::Unit => {}
                other => panic!("expected Unit, got {other:?}"),
            }
            settle().await;

            let after = procs[2]
                .global_object_clients()
                .expect("process 2 still has its own instance");
            assert!(
                !after.contains(&1),
                "forwarding process 1's instance through the shortcut must not add it as a client"
            );
        })
        .await;
}
