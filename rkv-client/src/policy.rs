//! # Connection Policy
//!
//! Purpose: Supply the pool engine's callbacks: handshake on create,
//! quit-less destroy, staleness probing before hand-off, and the
//! rebuild-and-ping availability check.
//!
//! ## Design Principles
//! 1. **Ordered Handshake**: Version negotiation, authentication, database
//!    select, and name registration run in a fixed order; the first server
//!    rejection is fatal for the attempt and is never retried here.
//! 2. **No Back-Reference**: The engine passes its availability flag into
//!    the hand-off hook; the policy owns no pointer to the pool that drives
//!    it.
//! 3. **Injected Extension Point**: The application's connected callback is
//!    a plain closure handed over at construction and invoked synchronously
//!    at the end of every successful handshake.

use std::sync::Arc;
use std::time::Duration;

use rkv_pool::{PoolPolicy, Slot};

use crate::config::{PoolOptions, ProtocolVersion};
use crate::conn::Conn;
use crate::error::{Error, HandshakeStep, Result};

/// Application hook invoked with every freshly handshaken connection.
pub type ConnectedCallback = Arc<dyn Fn(&mut Conn) -> Result<()> + Send + Sync>;

/// The exact error text a server answers one-argument AUTH with when no
/// password is configured. Matched verbatim: it means the connection is
/// already usable, and the match is intentionally not generalized.
const NO_PASSWORD_SET: &str = "ERR Client sent AUTH, but no password is set";

/// Connection-lifecycle callbacks plugged into the pool engine.
pub struct ConnPolicy {
    options: Arc<PoolOptions>,
    on_connected: Option<ConnectedCallback>,
}

impl ConnPolicy {
    pub fn new(options: Arc<PoolOptions>, on_connected: Option<ConnectedCallback>) -> Self {
        ConnPolicy {
            options,
            on_connected,
        }
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Opens a transport and walks the full handshake. The first fatal step
    /// wraps its underlying error with the step that broke.
    fn open_connection(&self) -> Result<Conn> {
        let options = &*self.options;
        let mut conn = Conn::from_options(options);
        conn.connect()
            .map_err(|err| Error::handshake(HandshakeStep::Connect, err))?;

        match options.protocol {
            ProtocolVersion::Resp3 => {
                conn.hello(
                    "3",
                    options.user.as_deref(),
                    options.password.as_deref(),
                    options.client_name.as_deref(),
                )
                .map_err(|err| Error::handshake(HandshakeStep::Hello, err))?;
            }
            ProtocolVersion::Resp2 => match (options.user.as_deref(), options.password.as_deref())
            {
                (Some(user), Some(password)) => {
                    conn.auth(user, password)
                        .map_err(|err| Error::handshake(HandshakeStep::Auth, err))?;
                }
                (None, Some(password)) => match conn.auth_password(password) {
                    Ok(()) => {}
                    // Documented quirk: this exact reply means the server
                    // runs without a password and the session is already in.
                    Err(Error::Server(message)) if message == NO_PASSWORD_SET => {}
                    Err(err) => return Err(Error::handshake(HandshakeStep::Auth, err)),
                },
                _ => {}
            },
        }

        if options.database > 0 {
            conn.select(options.database)
                .map_err(|err| Error::handshake(HandshakeStep::Select, err))?;
        }

        if let Some(name) = options.client_name.as_deref() {
            // The modern handshake already carried the name.
            if conn.protocol() == ProtocolVersion::Resp2 {
                conn.client_setname(name)
                    .map_err(|err| Error::handshake(HandshakeStep::SetName, err))?;
            }
        }

        if let Some(callback) = &self.on_connected {
            callback(&mut conn).map_err(|err| Error::handshake(HandshakeStep::Callback, err))?;
        }

        Ok(conn)
    }

    /// Tears the slot's connection down and handshakes a replacement.
    pub(crate) fn rebuild_slot(&self, slot: &mut Slot<Conn>) -> Result<()> {
        let old = slot.rebuild(|| self.open_connection())?;
        self.destroy(old);
        Ok(())
    }
}

impl PoolPolicy for ConnPolicy {
    type Item = Conn;
    type Error = Error;

    fn name(&self) -> String {
        self.options.key()
    }

    fn pool_size(&self) -> usize {
        self.options.max_pool_size
    }

    fn idle_timeout(&self) -> Option<Duration> {
        (!self.options.idle_timeout.is_zero()).then_some(self.options.idle_timeout)
    }

    fn acquire_timeout(&self) -> Duration {
        self.options.acquire_timeout
    }

    fn async_queue_capacity(&self) -> usize {
        self.options.async_queue_capacity
    }

    fn check_interval(&self) -> Option<Duration> {
        (!self.options.check_interval.is_zero()).then_some(self.options.check_interval)
    }

    fn create(&self) -> Result<Conn> {
        self.open_connection()
    }

    fn destroy(&self, conn: Conn) {
        // Dropping closes the socket directly. No QUIT first: after a
        // server-initiated disconnect that farewell blocks for many seconds,
        // so the transport is simply torn down.
        drop(conn);
    }

    fn before_hand_off(&self, slot: &mut Slot<Conn>, pool_available: bool) -> Result<()> {
        if !pool_available {
            // The pool is known to be down; skip re-validation and let the
            // caller's own command surface the failure.
            return Ok(());
        }
        if slot.idle() > self.options.stale_after || !slot.item().is_connected() {
            if slot.item_mut().ping().is_err() {
                // The connection died while idle; rebuild it transparently.
                // Only a failed rebuild propagates.
                self.rebuild_slot(slot)?;
            }
        }
        Ok(())
    }

    fn check(&self, slot: &mut Slot<Conn>) -> bool {
        if self.rebuild_slot(slot).is_err() {
            return false;
        }
        slot.item_mut().ping().is_ok()
    }

    fn on_acquire_timeout(&self) {
        tracing::debug!(pool = %self.name(), "no free connection within the acquire timeout");
    }

    fn on_available(&self) {
        tracing::debug!(pool = %self.name(), "connection policy observed recovery");
    }

    fn on_unavailable(&self) {
        tracing::debug!(pool = %self.name(), "connection policy observed outage");
    }
}
