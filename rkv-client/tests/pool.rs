//! Borrow/return lifecycle: reuse, staleness healing, release triage,
//! warm-up, and the async acquire path.

mod support;

use std::time::Duration;

use rkv_client::{ConnPool, Error, PoolOptions};

use support::{obliging, options_for, Action, FakeServer};

#[test]
fn released_connection_is_reused_without_a_second_handshake() {
    let server = FakeServer::start(obliging);
    let options = PoolOptions {
        password: Some("secret".to_string()),
        ..options_for(&server.addr())
    };
    let pool = ConnPool::new(options).expect("pool builds");

    for _ in 0..2 {
        let mut scope = pool.get().expect("borrow");
        scope.ping().expect("ping");
    }

    assert_eq!(server.connections(), 1);
    let names = server.command_names();
    // One AUTH at creation, then a PING per borrow; no re-handshake.
    assert_eq!(
        names,
        vec!["AUTH".to_string(), "PING".to_string(), "PING".to_string()]
    );
    assert_eq!(pool.stats().created, 1);
}

#[test]
fn idle_connection_gets_exactly_one_probe_before_reuse() {
    let server = FakeServer::start(obliging);
    let options = PoolOptions {
        stale_after: Duration::from_millis(150),
        ..options_for(&server.addr())
    };
    let pool = ConnPool::new(options).expect("pool builds");

    let mut scope = pool.get().expect("borrow");
    scope.exec(&[b"ECHO", b"first"]).expect("echo");
    drop(scope);

    std::thread::sleep(Duration::from_millis(300));

    let mut scope = pool.get().expect("borrow after idling");
    scope.exec(&[b"ECHO", b"second"]).expect("echo");
    drop(scope);

    // The staleness probe is the single PING between the two caller commands.
    assert_eq!(
        server.command_names(),
        vec![
            "ECHO".to_string(),
            "PING".to_string(),
            "ECHO".to_string()
        ]
    );
    assert_eq!(server.connections(), 1);
}

#[test]
fn dead_idle_connection_is_rebuilt_transparently() {
    // The server kills connection 0 at its second command (the staleness
    // probe); the pool must hand the caller a rebuilt connection instead.
    let server = FakeServer::start(|conn, idx, args: &[Vec<u8>]| {
        if conn == 0 && idx == 1 {
            Action::Close
        } else {
            obliging(conn, idx, args)
        }
    });
    let options = PoolOptions {
        stale_after: Duration::from_millis(100),
        ..options_for(&server.addr())
    };
    let pool = ConnPool::new(options).expect("pool builds");

    let mut scope = pool.get().expect("borrow");
    scope.ping().expect("ping");
    drop(scope);

    std::thread::sleep(Duration::from_millis(250));

    let mut scope = pool.get().expect("borrow finds a healed connection");
    scope.ping().expect("ping on the rebuilt connection");
    drop(scope);

    assert_eq!(server.connections(), 2);
    assert!(pool.is_available());
}

#[test]
fn incidental_error_keeps_a_live_connection() {
    // The second command on the connection fails, but the connection itself
    // stays healthy; release triage must keep it and the pool available.
    let server = FakeServer::start(|_conn, idx, args: &[Vec<u8>]| {
        if idx == 1 {
            Action::Error("ERR transient hiccup".to_string())
        } else {
            obliging(0, 0, args)
        }
    });
    let pool = ConnPool::new(options_for(&server.addr())).expect("pool builds");

    let mut scope = pool.get().expect("borrow");
    scope.ping().expect("first ping succeeds");
    let err = scope.ping().expect_err("second ping hits the scripted error");
    assert_eq!(err, Error::Server("ERR transient hiccup".to_string()));
    drop(scope);

    assert!(pool.is_available());
    assert_eq!(server.connections(), 1);
    assert_eq!(pool.stats().idle, 1);

    // The triage probe ran on release, and the same connection still serves.
    let mut scope = pool.get().expect("borrow again");
    scope.ping().expect("ping");
    assert_eq!(server.connections(), 1);
}

#[test]
fn repeated_probe_failure_marks_the_pool_unavailable() {
    // Every command gets its connection severed: the borrow fails, the
    // triage probe fails, the rebuilt connection fails again.
    let server = FakeServer::start(|_conn, _idx, _args: &[Vec<u8>]| Action::Close);
    let pool = ConnPool::new(options_for(&server.addr())).expect("pool builds");

    let mut scope = pool.get().expect("connecting alone still works");
    let err = scope.ping().expect_err("the server severs on command");
    drop(scope);

    assert!(!pool.is_available());
    let cause = pool.unavailable_cause().expect("cause recorded");
    assert_eq!(cause, err.to_string());

    let err = pool.get().expect_err("unavailable pool fails fast");
    assert!(matches!(err, Error::Unavailable(_)));
}

#[test]
fn scope_returns_the_slot_even_when_the_caller_panics() {
    let server = FakeServer::start(obliging);
    let pool = ConnPool::new(options_for(&server.addr())).expect("pool builds");

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let mut scope = pool.get().expect("borrow");
        scope.ping().expect("ping");
        panic!("caller exploded mid-borrow");
    }));
    assert!(outcome.is_err());

    // The slot came back on the panic path and is immediately reusable.
    assert_eq!(pool.stats().idle, 1);
    let mut scope = pool.get().expect("borrow after the panic");
    scope.ping().expect("ping");
    assert_eq!(server.connections(), 1);
}

#[test]
fn exhausted_pool_times_out() {
    let server = FakeServer::start(obliging);
    let options = PoolOptions {
        max_pool_size: 1,
        acquire_timeout: Duration::from_millis(150),
        ..options_for(&server.addr())
    };
    let pool = ConnPool::new(options).expect("pool builds");

    let held = pool.get().expect("fill the pool");
    let err = pool.get().expect_err("no slot frees up");
    assert!(matches!(err, Error::AcquireTimeout(_)));

    drop(held);
    let mut scope = pool.get().expect("borrow after release");
    scope.ping().expect("ping");
}

#[test]
fn key_and_prefix_pass_through() {
    let server = FakeServer::start(obliging);
    let addr = server.addr();
    let options = PoolOptions {
        database: 3,
        prefix: "app:".to_string(),
        ..options_for(&addr)
    };
    let pool = ConnPool::new(options).expect("pool builds");
    assert_eq!(pool.key(), format!("{addr}/3"));
    assert_eq!(pool.prefix(), "app:");
}

#[test]
fn warmup_with_zero_minimum_builds_nothing() {
    let server = FakeServer::start(obliging);
    let pool = ConnPool::new(options_for(&server.addr())).expect("pool builds");

    assert_eq!(server.connections(), 0);
    assert_eq!(pool.stats().created, 0);
    assert!(pool.is_available());
}

#[test]
fn warmup_clamps_an_oversized_minimum_to_capacity() {
    let server = FakeServer::start(obliging);
    let options = PoolOptions {
        min_pool_size: 23,
        max_pool_size: 10,
        ..options_for(&server.addr())
    };
    let pool = ConnPool::new(options).expect("pool builds");

    let stats = pool.stats();
    assert_eq!(stats.created, 10);
    assert_eq!(stats.idle, 10);
    assert!(pool.is_available());
}

#[test]
fn warmup_aborts_entirely_when_the_server_is_down() {
    // Grab a port that refuses connections.
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").to_string()
    };

    let options = PoolOptions {
        min_pool_size: 5,
        connect_timeout: Duration::from_millis(200),
        ..options_for(&addr)
    };
    // Warm-up failure never propagates to the caller configuring the pool.
    let pool = ConnPool::new(options).expect("construction still succeeds");

    assert!(!pool.is_available());
    assert_eq!(pool.stats().created, 0);
    let err = pool.get().expect_err("pool starts unavailable");
    assert!(matches!(err, Error::Unavailable(_)));
}

#[test]
fn warmup_aborts_when_the_first_probe_fails() {
    // Connections open fine but the validation ping is rejected.
    let server = FakeServer::start(|_conn, _idx, args: &[Vec<u8>]| {
        if args[0].eq_ignore_ascii_case(b"PING") {
            Action::Error("ERR LOADING data into memory".to_string())
        } else {
            obliging(0, 0, args)
        }
    });
    let options = PoolOptions {
        min_pool_size: 5,
        ..options_for(&server.addr())
    };
    let pool = ConnPool::new(options).expect("construction still succeeds");

    assert!(!pool.is_available());
    // Only the first probe's slot was built; no batches followed.
    assert!(pool.stats().created <= 1);
}

#[test]
fn manual_probe_recovers_a_pool_once_the_server_returns() {
    let server = FakeServer::start(obliging);
    let addr = server.addr();
    server.stop();

    let options = PoolOptions {
        min_pool_size: 2,
        connect_timeout: Duration::from_millis(200),
        ..options_for(&addr)
    };
    let pool = ConnPool::new(options).expect("pool builds");
    assert!(!pool.is_available());

    // Revive the server on the same port; the next probe pass heals the pool.
    let _revived = FakeServer::start_on(&addr, obliging);
    assert!(pool.probe_now());
    assert!(pool.is_available());

    let mut scope = pool.get().expect("borrow after recovery");
    scope.ping().expect("ping");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_borrow_waits_for_a_release() {
    let server = FakeServer::start(obliging);
    let options = PoolOptions {
        max_pool_size: 1,
        acquire_timeout: Duration::from_secs(2),
        ..options_for(&server.addr())
    };
    let pool = ConnPool::new(options).expect("pool builds");

    let held = pool.get().expect("fill the pool");
    let waiter_pool = pool.clone();
    let waiter = tokio::spawn(async move {
        let mut scope = waiter_pool.get_async().await.expect("handed-off borrow");
        scope.ping().expect("ping");
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(held);

    waiter.await.expect("waiter finished");
    assert_eq!(server.connections(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_borrow_fails_fast_when_the_queue_is_full() {
    let server = FakeServer::start(obliging);
    let options = PoolOptions {
        max_pool_size: 1,
        async_queue_capacity: 0,
        ..options_for(&server.addr())
    };
    let pool = ConnPool::new(options).expect("pool builds");

    let held = pool.get().expect("fill the pool");
    let err = pool
        .get_async()
        .await
        .expect_err("no queue capacity for a second borrower");
    assert_eq!(err, Error::AcquireQueueFull(0));
    drop(held);
}
