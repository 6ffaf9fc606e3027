//! # Connection Pool Facade
//!
//! Purpose: The type applications interact with. Hands out borrowed
//! connection scopes and decides, on every return, whether the connection
//! survives, gets rebuilt, or takes the whole pool unavailable.
//!
//! ## Design Principles
//! 1. **Scoped Borrowing**: Callers only ever see a [`ConnScope`]; the slot
//!    goes back to the engine on every exit path, exactly once.
//! 2. **Triage on Return**: An error observed during a borrow does not
//!    condemn the connection by itself; a live probe decides, and only a
//!    second failure after a rebuild escalates to pool-level unavailability.
//! 3. **Invisible Healing**: Callers see a working connection, a timeout, or
//!    their own command's error; resets and retries show up only as latency.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use rkv_pool::{LiveCheckHandle, Pool, PoolStats, Slot};

use crate::config::{PoolOptions, ProtocolVersion};
use crate::conn::Conn;
use crate::error::{Error, Result};
use crate::policy::{ConnPolicy, ConnectedCallback};
use crate::resp::Reply;
use crate::warmup;

struct Shared {
    pool: Arc<Pool<ConnPolicy>>,
    options: Arc<PoolOptions>,
    // Dropping the handle stops and joins the probe thread.
    _live_check: Option<LiveCheckHandle>,
}

/// Bounded pool of persistent, handshaken connections.
///
/// Cloning is cheap and shares the underlying pool.
#[derive(Clone)]
pub struct ConnPool {
    shared: Arc<Shared>,
}

impl ConnPool {
    /// Builds a pool from validated options and pre-warms it when a minimum
    /// size is configured. Warm-up failures never surface here; they only
    /// mark the pool unavailable for the background probe to recover.
    pub fn new(options: PoolOptions) -> Result<Self> {
        Self::build(options, None)
    }

    /// Same as [`new`](ConnPool::new), with an application callback invoked
    /// synchronously at the end of every successful handshake.
    pub fn with_callback(options: PoolOptions, on_connected: ConnectedCallback) -> Result<Self> {
        Self::build(options, Some(on_connected))
    }

    fn build(options: PoolOptions, on_connected: Option<ConnectedCallback>) -> Result<Self> {
        options.validate()?;
        let options = Arc::new(options);
        let policy = ConnPolicy::new(Arc::clone(&options), on_connected);
        let pool = Pool::new(policy);
        let live_check = pool.start_live_check();

        if options.min_pool_size > 0 {
            warmup::prewarm(&pool, options.min_pool_size);
        }

        Ok(ConnPool {
            shared: Arc::new(Shared {
                pool,
                options,
                _live_check: live_check,
            }),
        })
    }

    /// Borrows a connection, blocking up to the configured acquire timeout.
    pub fn get(&self) -> Result<ConnScope> {
        let slot = self.shared.pool.acquire()?;
        Ok(ConnScope::new(self.clone(), slot))
    }

    /// Borrows a connection without blocking a thread; queued behind at most
    /// `async_queue_capacity` pending acquirers.
    pub async fn get_async(&self) -> Result<ConnScope> {
        let slot = self.shared.pool.acquire_async().await?;
        Ok(ConnScope::new(self.clone(), slot))
    }

    /// Pool identity: host plus database index.
    pub fn key(&self) -> String {
        self.shared.options.key()
    }

    /// Key namespace prefix passed through from configuration.
    pub fn prefix(&self) -> &str {
        &self.shared.options.prefix
    }

    pub fn options(&self) -> &PoolOptions {
        &self.shared.options
    }

    pub fn is_available(&self) -> bool {
        self.shared.pool.is_available()
    }

    /// The failure that tripped the pool into unavailability, if any.
    pub fn unavailable_cause(&self) -> Option<String> {
        self.shared.pool.unavailable_cause()
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }

    /// Runs one availability probe pass immediately instead of waiting for
    /// the background interval. Returns whether the pool is available.
    pub fn probe_now(&self) -> bool {
        self.shared.pool.run_live_check()
    }

    /// Return path for a finished borrow.
    ///
    /// No observed error returns the slot untouched; with one, the existing
    /// connection gets a probe, a failed probe a rebuild and re-probe, and a
    /// second failure marks the pool unavailable with the original error as
    /// cause. The engine's own release runs exactly once on every path.
    fn release_after(&self, mut slot: Slot<Conn>, observed: Option<Error>) {
        if let Some(err) = observed {
            if slot.item_mut().ping().is_ok() {
                tracing::warn!(
                    pool = %self.key(),
                    error = %err,
                    "command failed but the connection still answers; keeping it"
                );
            } else {
                let policy = self.shared.pool.policy();
                let healed = match policy.rebuild_slot(&mut slot) {
                    Ok(()) => slot.item_mut().ping().is_ok(),
                    Err(_) => false,
                };
                if !healed {
                    self.shared.pool.mark_unavailable(err.to_string());
                }
            }
        }
        self.shared.pool.release(slot);
    }
}

impl std::fmt::Debug for ConnPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnPool")
            .field("key", &self.key())
            .field("available", &self.is_available())
            .finish()
    }
}

/// A borrowed connection for exactly one borrow/use/return cycle.
///
/// Every forwarded call runs against the checked-out connection; the first
/// error any of them returns is also stashed so the return path can triage
/// it. Dropping the scope reports the outcome exactly once, on normal and
/// error exits alike.
pub struct ConnScope {
    pool: ConnPool,
    slot: Option<Slot<Conn>>,
    observed: Option<Error>,
}

impl ConnScope {
    fn new(pool: ConnPool, slot: Slot<Conn>) -> Self {
        ConnScope {
            pool,
            slot: Some(slot),
            observed: None,
        }
    }

    fn conn(&self) -> &Conn {
        self.slot.as_ref().expect("scope holds its slot").item()
    }

    fn conn_mut(&mut self) -> &mut Conn {
        self.slot.as_mut().expect("scope holds its slot").item_mut()
    }

    fn capture<T>(&mut self, outcome: Result<T>) -> Result<T> {
        if let Err(err) = &outcome {
            if self.observed.is_none() {
                self.observed = Some(err.clone());
            }
        }
        outcome
    }

    /// One request/response round trip on the borrowed connection.
    pub fn exec(&mut self, args: &[&[u8]]) -> Result<Reply> {
        let outcome = self.conn_mut().exec(args);
        self.capture(outcome)
    }

    /// Writes one command without reading its reply.
    pub fn write_command(&mut self, args: &[&[u8]]) -> Result<()> {
        let outcome = self.conn_mut().write_command(args);
        self.capture(outcome)
    }

    /// Reads one pending reply frame.
    pub fn read_reply(&mut self) -> Result<Reply> {
        let outcome = self.conn_mut().read_reply();
        self.capture(outcome)
    }

    /// Streams one pending bulk reply into `dest`.
    pub fn read_chunk(&mut self, dest: &mut dyn Write) -> Result<u64> {
        let outcome = self.conn_mut().read_chunk(dest);
        self.capture(outcome)
    }

    /// Liveness probe on the borrowed connection.
    pub fn ping(&mut self) -> Result<()> {
        let outcome = self.conn_mut().ping();
        self.capture(outcome)
    }

    /// Re-dials the transport.
    pub fn connect(&mut self) -> Result<()> {
        let outcome = self.conn_mut().connect();
        self.capture(outcome)
    }

    /// Re-targets the borrowed connection at a different host.
    pub fn reset_host(&mut self, host: &str) {
        self.conn_mut().reset_host(host);
    }

    pub fn host(&self) -> &str {
        self.conn().host()
    }

    pub fn is_connected(&self) -> bool {
        self.conn().is_connected()
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.conn().protocol()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.conn().connect_timeout()
    }

    pub fn recv_timeout(&self) -> Duration {
        self.conn().recv_timeout()
    }

    pub fn send_timeout(&self) -> Duration {
        self.conn().send_timeout()
    }

    pub fn set_recv_timeout(&mut self, timeout: Duration) -> Result<()> {
        let outcome = self.conn_mut().set_recv_timeout(timeout);
        self.capture(outcome)
    }

    pub fn set_send_timeout(&mut self, timeout: Duration) -> Result<()> {
        let outcome = self.conn_mut().set_send_timeout(timeout);
        self.capture(outcome)
    }
}

impl Drop for ConnScope {
    fn drop(&mut self) {
        // Exactly-once: the slot leaves on the first drop, a second pass
        // finds nothing.
        if let Some(slot) = self.slot.take() {
            self.pool.release_after(slot, self.observed.take());
        }
    }
}

impl std::fmt::Debug for ConnScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnScope")
            .field("host", &self.host())
            .field("observed_error", &self.observed)
            .finish()
    }
}
