//! Small operational probe: build a pool against a live server, warm it,
//! run a few pings, and print the resulting bookkeeping.
//!
//! Usage: `pool_probe [host:port]` (defaults to 127.0.0.1:6379).

use std::time::{Duration, Instant};

use anyhow::Context;

use rkv_client::{ConnPool, PoolOptions};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let host = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:6379".to_string());

    let options = PoolOptions {
        host: host.clone(),
        min_pool_size: 5,
        max_pool_size: 16,
        acquire_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(2),
        recv_timeout: Duration::from_secs(2),
        send_timeout: Duration::from_secs(2),
        ..PoolOptions::default()
    };

    let started = Instant::now();
    let pool = ConnPool::new(options).context("building the pool")?;
    println!(
        "pool {} built in {:?} (available: {})",
        pool.key(),
        started.elapsed(),
        pool.is_available()
    );

    for round in 0..3 {
        let mut scope = pool.get().context("borrowing a connection")?;
        let probe = Instant::now();
        scope.ping().context("pinging")?;
        println!("round {round}: ping in {:?} via {}", probe.elapsed(), scope.host());
    }

    let stats = pool.stats();
    println!(
        "slots: {} created, {} idle, {} in use, {} async waiters",
        stats.created, stats.idle, stats.in_use, stats.async_waiters
    );
    Ok(())
}
