//! # Client Error Taxonomy
//!
//! Purpose: One enum for everything this layer can fail with, from socket
//! teardown to handshake rejection to pool exhaustion.
//!
//! ## Design Principles
//! 1. **Cloneable Errors**: A borrowed scope must both hand an error to the
//!    caller and stash a copy for release triage, so every variant is `Clone`
//!    (io errors are lowered to kind + message for this).
//! 2. **Step-Tagged Handshakes**: Creation failures carry the handshake step
//!    that broke, wrapping the underlying error unchanged.
//! 3. **Fail Fast**: Pool-level failures (timeout, queue full, unavailable)
//!    are distinct variants so callers can match without string inspection.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use rkv_pool::PoolError;

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The handshake step that failed during connection creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Dialing the transport and applying socket timeouts.
    Connect,
    /// RESP3 version negotiation.
    Hello,
    /// Legacy authentication.
    Auth,
    /// Selecting the configured database.
    Select,
    /// Registering the client display name.
    SetName,
    /// The user-supplied connected callback.
    Callback,
}

impl fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeStep::Connect => "connect",
            HandshakeStep::Hello => "hello",
            HandshakeStep::Auth => "auth",
            HandshakeStep::Select => "select",
            HandshakeStep::SetName => "set-name",
            HandshakeStep::Callback => "connected-callback",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the client connection layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Network or IO failure while reading/writing.
    #[error("io error ({kind:?}): {message}")]
    Io {
        kind: io::ErrorKind,
        message: String,
    },
    /// Reply framing violated the protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// The server answered with an error reply.
    #[error("server error: {0}")]
    Server(String),
    /// Connection creation failed; wraps the first fatal step's error.
    #[error("handshake failed at {step}: {source}")]
    Handshake {
        step: HandshakeStep,
        #[source]
        source: Box<Error>,
    },
    /// The reply type did not match what the command expects.
    #[error("unexpected reply, expected {expected}")]
    UnexpectedReply { expected: &'static str },
    /// The address could not be resolved to a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// No pooled connection became available within the configured wait.
    #[error("acquire timed out after {0:?}")]
    AcquireTimeout(Duration),
    /// Too many asynchronous acquirers are already queued.
    #[error("async acquire queue is full (capacity {0})")]
    AcquireQueueFull(usize),
    /// The pool is marked unavailable; recovery is automatic via the
    /// periodic liveness probe.
    #[error("pool unavailable: {0}")]
    Unavailable(String),
    /// The pool has been shut down.
    #[error("pool is closed")]
    PoolClosed,
    /// The configuration violated an invariant.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn handshake(step: HandshakeStep, source: Error) -> Self {
        Error::Handshake {
            step,
            source: Box::new(source),
        }
    }

    /// The handshake step a creation failure broke at, if this is one.
    pub fn handshake_step(&self) -> Option<HandshakeStep> {
        match self {
            Error::Handshake { step, .. } => Some(*step),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<PoolError<Error>> for Error {
    fn from(err: PoolError<Error>) -> Self {
        match err {
            PoolError::Timeout(waited) => Error::AcquireTimeout(waited),
            PoolError::QueueFull(capacity) => Error::AcquireQueueFull(capacity),
            PoolError::Unavailable(cause) => Error::Unavailable(cause),
            PoolError::Closed => Error::PoolClosed,
            PoolError::Policy(inner) => inner,
        }
    }
}
