//! # Single Connection
//!
//! Purpose: One logical connection to the server, with reusable buffers and
//! the handful of lifecycle commands the pool needs to set up, probe, and
//! heal it.
//!
//! ## Design Principles
//! 1. **Explicit Dialing**: Only `connect` establishes a transport. Commands
//!    never re-dial on their own, because a fresh socket has not been through
//!    the handshake; replacements come from the connection policy.
//! 2. **Poisoned-on-Failure**: Any transport-level failure tears the socket
//!    down; `is_connected` then reports false until the next `connect`.
//! 3. **Server Errors Are Data**: `-ERR` replies surface as [`Error::Server`]
//!    and leave the transport up; only IO and framing failures poison it.
//! 4. **Cache-Friendly Buffers**: Line and write buffers live on the
//!    connection and are reused across commands.

use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::config::{PoolOptions, ProtocolVersion};
use crate::error::{Error, Result};
use crate::resp::{encode_command, read_bulk_chunk, read_reply, Reply};

/// A single logical connection with reusable buffers.
pub struct Conn {
    host: String,
    connect_timeout: Duration,
    recv_timeout: Duration,
    send_timeout: Duration,
    protocol: ProtocolVersion,
    transport: Option<BufReader<TcpStream>>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Conn {
    /// Creates a disconnected connection; call [`connect`](Conn::connect)
    /// before issuing commands.
    pub fn new(
        host: impl Into<String>,
        connect_timeout: Duration,
        recv_timeout: Duration,
        send_timeout: Duration,
    ) -> Self {
        Conn {
            host: host.into(),
            connect_timeout,
            recv_timeout,
            send_timeout,
            protocol: ProtocolVersion::Resp2,
            transport: None,
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        }
    }

    pub(crate) fn from_options(options: &PoolOptions) -> Self {
        Conn::new(
            &options.host,
            options.connect_timeout,
            options.recv_timeout,
            options.send_timeout,
        )
    }

    /// Dials the configured host and applies the socket timeouts.
    ///
    /// A fresh transport always starts on the legacy protocol; HELLO is what
    /// promotes it.
    pub fn connect(&mut self) -> Result<()> {
        self.transport = None;
        self.protocol = ProtocolVersion::Resp2;

        let addrs: Vec<SocketAddr> = self
            .host
            .to_socket_addrs()
            .map_err(|_| Error::InvalidAddress(self.host.clone()))?
            .collect();
        if addrs.is_empty() {
            return Err(Error::InvalidAddress(self.host.clone()));
        }

        let mut last_err: Option<Error> = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.recv_timeout))?;
                    stream.set_write_timeout(Some(self.send_timeout))?;
                    // Disable Nagle; handshake and probes are small writes.
                    stream.set_nodelay(true)?;
                    self.transport = Some(BufReader::new(stream));
                    return Ok(());
                }
                Err(err) => last_err = Some(err.into()),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::InvalidAddress(self.host.clone())))
    }

    /// Whether a transport is currently established. A peer that silently
    /// dropped us still reads as connected until the next IO failure.
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Re-targets the connection at a different host. The transport drops;
    /// the next call re-dials.
    pub fn reset_host(&mut self, host: impl Into<String>) {
        self.host = host.into();
        self.transport = None;
        self.protocol = ProtocolVersion::Resp2;
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Protocol negotiated on the current transport.
    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn recv_timeout(&self) -> Duration {
        self.recv_timeout
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Updates the receive timeout, applying it to a live socket as well.
    pub fn set_recv_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.recv_timeout = timeout;
        if let Some(transport) = self.transport.as_mut() {
            transport.get_ref().set_read_timeout(Some(timeout))?;
        }
        Ok(())
    }

    /// Updates the send timeout, applying it to a live socket as well.
    pub fn set_send_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.send_timeout = timeout;
        if let Some(transport) = self.transport.as_mut() {
            transport.get_ref().set_write_timeout(Some(timeout))?;
        }
        Ok(())
    }

    /// Writes one command on the established transport.
    ///
    /// There is deliberately no lazy re-dial here: a replacement transport
    /// has not been through the handshake, so only [`connect`](Conn::connect)
    /// or a policy-driven rebuild may bring a connection back.
    pub fn write_command(&mut self, args: &[&[u8]]) -> Result<()> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);

        let outcome: Result<()> = (|| {
            let transport = transport_mut(&mut self.transport)?;
            let stream = transport.get_mut();
            stream.write_all(&self.write_buf)?;
            stream.flush()?;
            Ok(())
        })();
        self.poison_on_failure(outcome)
    }

    /// Reads one reply frame.
    pub fn read_reply(&mut self) -> Result<Reply> {
        let outcome: Result<Reply> = (|| {
            let transport = transport_mut(&mut self.transport)?;
            read_reply(transport, &mut self.line_buf)
        })();
        self.poison_on_failure(outcome)
    }

    /// Streams one bulk reply into `dest` in fixed-size chunks.
    pub fn read_chunk(&mut self, dest: &mut dyn std::io::Write) -> Result<u64> {
        let outcome: Result<u64> = (|| {
            let transport = transport_mut(&mut self.transport)?;
            read_bulk_chunk(transport, dest, &mut self.line_buf)
        })();
        match &outcome {
            // A server error reply is a complete frame; the transport is fine.
            Err(Error::Server(_)) => outcome,
            _ => self.poison_on_failure(outcome),
        }
    }

    /// One request/response round trip.
    pub fn exec(&mut self, args: &[&[u8]]) -> Result<Reply> {
        self.write_command(args)?;
        self.read_reply()
    }

    /// Lightweight liveness probe; succeeds only on the expected `PONG`.
    pub fn ping(&mut self) -> Result<()> {
        match self.exec(&[b"PING"])? {
            Reply::Simple(text) if text == b"PONG" => Ok(()),
            Reply::Error(message) => Err(server_error(&message)),
            _ => Err(Error::UnexpectedReply { expected: "PONG" }),
        }
    }

    /// Two-argument authentication (user + password).
    pub fn auth(&mut self, user: &str, password: &str) -> Result<()> {
        self.expect_ok(&[b"AUTH", user.as_bytes(), password.as_bytes()], "+OK")
    }

    /// One-argument authentication (password only).
    pub fn auth_password(&mut self, password: &str) -> Result<()> {
        self.expect_ok(&[b"AUTH", password.as_bytes()], "+OK")
    }

    /// Selects a database index on this connection.
    pub fn select(&mut self, database: u32) -> Result<()> {
        let database = database.to_string();
        self.expect_ok(&[b"SELECT", database.as_bytes()], "+OK")
    }

    /// Registers a display name for this connection.
    pub fn client_setname(&mut self, name: &str) -> Result<()> {
        self.expect_ok(&[b"CLIENT", b"SETNAME", name.as_bytes()], "+OK")
    }

    /// Version-negotiation handshake. Credentials and display name ride
    /// along; a missing user with a password authenticates as "default".
    /// On success the connection is marked as running the modern protocol.
    pub fn hello(
        &mut self,
        version: &str,
        user: Option<&str>,
        password: Option<&str>,
        client_name: Option<&str>,
    ) -> Result<()> {
        let mut args: Vec<&[u8]> = vec![b"HELLO", version.as_bytes()];
        if let Some(password) = password {
            args.push(b"AUTH");
            args.push(user.unwrap_or("default").as_bytes());
            args.push(password.as_bytes());
        }
        if let Some(name) = client_name {
            args.push(b"SETNAME");
            args.push(name.as_bytes());
        }

        match self.exec(&args)? {
            Reply::Error(message) => Err(server_error(&message)),
            _ => {
                self.protocol = ProtocolVersion::Resp3;
                Ok(())
            }
        }
    }

    fn expect_ok(&mut self, args: &[&[u8]], expected: &'static str) -> Result<()> {
        match self.exec(args)? {
            Reply::Simple(_) => Ok(()),
            Reply::Error(message) => Err(server_error(&message)),
            _ => Err(Error::UnexpectedReply { expected }),
        }
    }

    /// Drops the transport on transport-level failures so the next call
    /// re-dials a clean socket.
    fn poison_on_failure<T>(&mut self, outcome: Result<T>) -> Result<T> {
        if outcome.is_err() {
            self.transport = None;
            self.protocol = ProtocolVersion::Resp2;
        }
        outcome
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("host", &self.host)
            .field("connected", &self.is_connected())
            .field("protocol", &self.protocol)
            .finish()
    }
}

fn transport_mut(
    transport: &mut Option<BufReader<TcpStream>>,
) -> Result<&mut BufReader<TcpStream>> {
    transport
        .as_mut()
        .ok_or_else(|| Error::Protocol("connection is not established".into()))
}

fn server_error(message: &[u8]) -> Error {
    Error::Server(String::from_utf8_lossy(message).into_owned())
}
