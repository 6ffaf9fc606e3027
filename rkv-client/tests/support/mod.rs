//! Scripted fake server for exercising the pool over real sockets.
//!
//! Each accepted connection gets its own thread; the test's script decides,
//! per (connection, command) pair, how the server answers. Every command is
//! recorded so tests can assert exact sequences.

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rkv_client::PoolOptions;

/// How the fake server answers one command.
pub enum Action {
    Simple(&'static str),
    Bulk(Vec<u8>),
    Int(i64),
    Error(String),
    /// A RESP3-style HELLO map reply.
    HelloMap,
    /// Sever the connection without replying.
    Close,
}

type Script = dyn Fn(usize, usize, &[Vec<u8>]) -> Action + Send + Sync + 'static;

pub struct FakeServer {
    addr: String,
    log: Arc<Mutex<Vec<(usize, Vec<Vec<u8>>)>>>,
    conn_count: Arc<AtomicUsize>,
    live: Arc<Mutex<Vec<TcpStream>>>,
    stopping: Arc<AtomicBool>,
}

impl FakeServer {
    pub fn start(
        script: impl Fn(usize, usize, &[Vec<u8>]) -> Action + Send + Sync + 'static,
    ) -> Self {
        Self::start_on("127.0.0.1:0", script)
    }

    /// Binds a specific address; retries briefly so tests can revive a
    /// just-stopped server on the same port.
    pub fn start_on(
        bind: &str,
        script: impl Fn(usize, usize, &[Vec<u8>]) -> Action + Send + Sync + 'static,
    ) -> Self {
        let mut listener = TcpListener::bind(bind);
        for _ in 0..50 {
            if listener.is_ok() {
                break;
            }
            thread::sleep(Duration::from_millis(20));
            listener = TcpListener::bind(bind);
        }
        let listener = listener.expect("bind fake server");
        let addr = listener.local_addr().expect("local addr").to_string();

        let log = Arc::new(Mutex::new(Vec::new()));
        let conn_count = Arc::new(AtomicUsize::new(0));
        let live = Arc::new(Mutex::new(Vec::new()));
        let stopping = Arc::new(AtomicBool::new(false));
        let script: Arc<Script> = Arc::new(script);

        {
            let log = Arc::clone(&log);
            let conn_count = Arc::clone(&conn_count);
            let live = Arc::clone(&live);
            let stopping = Arc::clone(&stopping);
            thread::spawn(move || {
                for stream in listener.incoming() {
                    if stopping.load(Ordering::Acquire) {
                        break;
                    }
                    let Ok(stream) = stream else { break };
                    let conn_id = conn_count.fetch_add(1, Ordering::SeqCst);
                    if let Ok(clone) = stream.try_clone() {
                        live.lock().expect("live list").push(clone);
                    }
                    let log = Arc::clone(&log);
                    let script = Arc::clone(&script);
                    thread::spawn(move || serve_connection(conn_id, stream, log, script));
                }
            });
        }

        FakeServer {
            addr,
            log,
            conn_count,
            live,
            stopping,
        }
    }

    pub fn addr(&self) -> String {
        self.addr.clone()
    }

    /// Total connections the server has accepted.
    pub fn connections(&self) -> usize {
        self.conn_count.load(Ordering::SeqCst)
    }

    /// Every command received, tagged with its connection index.
    pub fn log(&self) -> Vec<(usize, Vec<Vec<u8>>)> {
        self.log.lock().expect("command log").clone()
    }

    /// Command names in arrival order, e.g. `["AUTH", "SELECT", "PING"]`.
    pub fn command_names(&self) -> Vec<String> {
        self.log()
            .iter()
            .map(|(_, args)| String::from_utf8_lossy(&args[0]).to_uppercase())
            .collect()
    }

    /// Full argument vectors for one connection, in arrival order.
    pub fn commands_for(&self, conn: usize) -> Vec<Vec<Vec<u8>>> {
        self.log()
            .into_iter()
            .filter(|(id, _)| *id == conn)
            .map(|(_, args)| args)
            .collect()
    }

    /// Stops accepting and severs every live connection. The port becomes
    /// free for a later `start_on`.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        // Unblock the accept loop so the listener actually closes.
        let _ = TcpStream::connect(&self.addr);
        for stream in self.live.lock().expect("live list").iter() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        thread::sleep(Duration::from_millis(50));
    }
}

/// Answers like a healthy server: PONG to PING, a map to HELLO, OK to
/// everything else (ECHO gets its payload back).
pub fn obliging(_conn: usize, _idx: usize, args: &[Vec<u8>]) -> Action {
    if args[0].eq_ignore_ascii_case(b"PING") {
        Action::Simple("PONG")
    } else if args[0].eq_ignore_ascii_case(b"HELLO") {
        Action::HelloMap
    } else if args[0].eq_ignore_ascii_case(b"ECHO") {
        Action::Bulk(args.get(1).cloned().unwrap_or_default())
    } else {
        Action::Simple("OK")
    }
}

/// Options tuned for tests: tiny timeouts, no warm-up, no background probe,
/// no engine-level idle rebuilds.
pub fn options_for(addr: &str) -> PoolOptions {
    PoolOptions {
        host: addr.to_string(),
        min_pool_size: 0,
        max_pool_size: 4,
        idle_timeout: Duration::ZERO,
        stale_after: Duration::from_secs(60),
        acquire_timeout: Duration::from_secs(1),
        check_interval: Duration::ZERO,
        connect_timeout: Duration::from_secs(1),
        recv_timeout: Duration::from_secs(1),
        send_timeout: Duration::from_secs(1),
        ..PoolOptions::default()
    }
}

fn serve_connection(
    conn_id: usize,
    stream: TcpStream,
    log: Arc<Mutex<Vec<(usize, Vec<Vec<u8>>)>>>,
    script: Arc<Script>,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let mut reader = match stream.try_clone() {
        Ok(clone) => BufReader::new(clone),
        Err(_) => return,
    };
    let mut stream = stream;
    let mut idx = 0;
    loop {
        let args = match read_command(&mut reader) {
            Some(args) => args,
            None => return,
        };
        log.lock().expect("command log").push((conn_id, args.clone()));
        match script(conn_id, idx, &args) {
            Action::Simple(text) => write_simple(&mut stream, text),
            Action::Bulk(data) => write_bulk(&mut stream, &data),
            Action::Int(value) => write_integer(&mut stream, value),
            Action::Error(message) => write_error(&mut stream, &message),
            Action::HelloMap => write_hello_map(&mut stream),
            Action::Close => {
                let _ = stream.shutdown(Shutdown::Both);
                return;
            }
        }
        idx += 1;
    }
}

fn read_command(reader: &mut BufReader<TcpStream>) -> Option<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?;
    if line.first() != Some(&b'*') {
        return None;
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?;
        if line.first() != Some(&b'$') {
            return None;
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data).ok()?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).ok()?;
        if crlf != [b'\r', b'\n'] {
            return None;
        }
        args.push(data);
    }
    Some(args)
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> Option<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf).ok()?;
    if bytes == 0 || buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return None;
    }
    buf.truncate(buf.len() - 2);
    Some(())
}

fn parse_usize(data: &[u8]) -> Option<usize> {
    if data.is_empty() {
        return None;
    }
    let mut value = 0usize;
    for &b in data {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as usize);
    }
    Some(value)
}

fn write_simple(stream: &mut TcpStream, message: &str) {
    let _ = stream.write_all(b"+");
    let _ = stream.write_all(message.as_bytes());
    let _ = stream.write_all(b"\r\n");
    let _ = stream.flush();
}

fn write_error(stream: &mut TcpStream, message: &str) {
    let _ = stream.write_all(b"-");
    let _ = stream.write_all(message.as_bytes());
    let _ = stream.write_all(b"\r\n");
    let _ = stream.flush();
}

fn write_bulk(stream: &mut TcpStream, data: &[u8]) {
    let _ = stream.write_all(b"$");
    let _ = stream.write_all(data.len().to_string().as_bytes());
    let _ = stream.write_all(b"\r\n");
    let _ = stream.write_all(data);
    let _ = stream.write_all(b"\r\n");
    let _ = stream.flush();
}

fn write_integer(stream: &mut TcpStream, value: i64) {
    let _ = stream.write_all(b":");
    let _ = stream.write_all(value.to_string().as_bytes());
    let _ = stream.write_all(b"\r\n");
    let _ = stream.flush();
}

fn write_hello_map(stream: &mut TcpStream) {
    let _ = stream.write_all(
        b"%3\r\n$6\r\nserver\r\n$5\r\nredis\r\n$5\r\nproto\r\n:3\r\n$4\r\nmode\r\n$10\r\nstandalone\r\n",
    );
    let _ = stream.flush();
}
