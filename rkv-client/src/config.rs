//! # Pool Configuration
//!
//! Purpose: Structured settings for the connection pool and handshake.
//! Connection-string parsing happens elsewhere; this layer consumes the
//! already-parsed values.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which handshake variant new connections negotiate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// Legacy handshake: explicit AUTH / SELECT / CLIENT SETNAME calls.
    #[default]
    Resp2,
    /// Modern handshake: a single HELLO carrying credentials and name.
    Resp3,
}

/// Settings consumed by the pool, the handshake, and the warm-up routine.
///
/// Defaults mirror the connection-string defaults of the wire-compatible
/// servers this client targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    /// Server address, e.g. "127.0.0.1:6379".
    pub host: String,
    /// Username for authentication; requires `password` to take effect.
    pub user: Option<String>,
    /// Password for authentication.
    pub password: Option<String>,
    /// Database index selected after authentication. 0 is the server default
    /// and issues no SELECT.
    pub database: u32,
    /// Display name registered with the server for this client.
    pub client_name: Option<String>,
    /// Handshake variant for new connections.
    pub protocol: ProtocolVersion,
    /// Key namespace prefix passed through to callers.
    pub prefix: String,
    /// Connections pre-built and validated at pool construction. 0 disables
    /// warm-up.
    pub min_pool_size: usize,
    /// Maximum live connections, idle plus checked out.
    pub max_pool_size: usize,
    /// Idle age after which the engine rebuilds a connection outright before
    /// hand-off. Zero disables.
    pub idle_timeout: Duration,
    /// Idle age past which a connection is pinged before hand-off instead of
    /// trusted blindly.
    pub stale_after: Duration,
    /// How long a synchronous or asynchronous acquire may wait.
    pub acquire_timeout: Duration,
    /// Upper bound on queued asynchronous acquirers.
    pub async_queue_capacity: usize,
    /// Interval of the background availability probe. Zero disables.
    pub check_interval: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Socket receive timeout applied to every new connection.
    pub recv_timeout: Duration,
    /// Socket send timeout applied to every new connection.
    pub send_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            host: "127.0.0.1:6379".to_string(),
            user: None,
            password: None,
            database: 0,
            client_name: None,
            protocol: ProtocolVersion::default(),
            prefix: String::new(),
            min_pool_size: 1,
            max_pool_size: 100,
            idle_timeout: Duration::from_secs(20),
            stale_after: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(10),
            async_queue_capacity: 100_000,
            check_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            recv_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
        }
    }
}

impl PoolOptions {
    /// Checks the size invariants before a pool is built from these options.
    ///
    /// A `min_pool_size` above `max_pool_size` is not an error; warm-up
    /// clamps its target to the capacity.
    pub fn validate(&self) -> Result<()> {
        if self.max_pool_size == 0 {
            return Err(Error::Config("max_pool_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Pool identity: host plus database index. Distinguishes pools in a
    /// multi-pool registry.
    pub fn key(&self) -> String {
        format!("{}/{}", self.host, self.database)
    }
}
