//! # rkv Client Connection Layer
//!
//! Purpose: Manage a bounded pool of persistent, handshaken connections to a
//! Redis-compatible key-value server: creation with ordered protocol setup,
//! staleness detection and healing, error-triaged returns, and budgeted
//! warm-up.
//!
//! ## Design Principles
//! 1. **Policy over Engine**: The generic slot engine lives in `rkv-pool`;
//!    this crate supplies the connection-shaped policy plugged into it.
//! 2. **Scoped Borrows**: Callers interact through [`ConnScope`], which
//!    guarantees the slot returns to the engine on every exit path.
//! 3. **Self-Healing**: Stale or broken connections are rebuilt
//!    transparently; only repeated failure escalates to pool-level
//!    unavailability, and recovery back from it is automatic.
//! 4. **Fail Fast**: An unreachable server turns into immediate errors, not
//!    queued work.

mod config;
mod conn;
mod error;
mod policy;
mod pool;
mod resp;
mod warmup;

pub use config::{PoolOptions, ProtocolVersion};
pub use conn::Conn;
pub use error::{Error, HandshakeStep, Result};
pub use policy::{ConnPolicy, ConnectedCallback};
pub use pool::{ConnPool, ConnScope};
pub use resp::{encode_command, Reply};
pub use rkv_pool::PoolStats;
