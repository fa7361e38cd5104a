//! # Connection Pool
//!
//! Purpose: Reuse TCP connections to the store so each logical operation only
//! pays for its own round trips, never for a handshake.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections.
//! 3. **Fail Fast**: Exceeding the pool limit returns an error immediately.
//! 4. **Cache-Friendly Buffers**: Each connection reuses its own buffers.
//! 5. **Health on Borrow**: Idle connections are checked with `PING` before
//!    reuse, and dropped once they exceed the idle timeout.
//!
//! ## Pipelining
//!
//! `PooledConnection::send` only appends to the connection's write buffer.
//! `flush` transmits everything queued in one write, and `receive` reads one
//! reply at a time in submission order. A connection returned with replies
//! still unread is closed rather than pooled, so the next borrower never sees
//! another operation's replies.

use std::collections::VecDeque;
use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::resp::{encode_command, read_response, RespValue};

/// Pool configuration for the sync client.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Password sent with `AUTH` right after dialing.
    pub password: Option<String>,
    /// Store index selected right after dialing.
    pub database: u32,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Idle connections older than this are closed instead of reused.
    pub idle_timeout: Option<Duration>,
    /// Idle connections younger than this skip the borrow-time `PING`.
    pub keep_alive: Option<Duration>,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            addr: "127.0.0.1:6379".to_string(),
            password: None,
            database: 0,
            max_idle: 8,
            max_total: 16,
            idle_timeout: Some(Duration::from_secs(240)),
            keep_alive: None,
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
        }
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections parked in the pool.
    pub idle: usize,
    /// Connections alive, idle or leased.
    pub total: usize,
}

struct IdleConnection {
    conn: Connection,
    since: Instant,
}

struct PoolState {
    idle: VecDeque<IdleConnection>,
    total: usize,
    closed: bool,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a new connection pool with the provided configuration.
    ///
    /// No connection is dialed until the first `acquire`.
    pub fn new(config: PoolConfig) -> ClientResult<Self> {
        resolve_addr(&config.addr)?;
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            total: 0,
            closed: false,
        };
        Ok(ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
            }),
        })
    }

    /// Returns the configuration this pool dials with.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Acquires a connection from the pool.
    ///
    /// Idle connections are health-checked first; a connection failing the
    /// check is discarded and the next one is tried before dialing.
    pub fn acquire(&self) -> ClientResult<PooledConnection> {
        while let Some(mut idle) = self.pop_idle()? {
            match self.test_on_borrow(&mut idle) {
                Ok(()) => return Ok(PooledConnection::new(self.inner.clone(), idle.conn)),
                Err(err) => {
                    warn!(
                        addr = %self.inner.config.addr,
                        error = %err,
                        "discarding unhealthy pooled connection"
                    );
                    self.release_slot();
                }
            }
        }

        if !self.try_reserve()? {
            return Err(ClientError::PoolExhausted);
        }

        match Connection::connect(&self.inner.config) {
            Ok(conn) => Ok(PooledConnection::new(self.inner.clone(), conn)),
            Err(err) => {
                self.release_slot();
                Err(err)
            }
        }
    }

    /// Closes the pool: idle connections are dropped now, leased ones when
    /// they are returned. Later `acquire` calls fail with `PoolClosed`.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        let dropped = state.idle.len();
        state.idle.clear();
        state.total = state.total.saturating_sub(dropped);
    }

    /// Returns true once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Returns current occupancy.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            idle: state.idle.len(),
            total: state.total,
        }
    }

    fn pop_idle(&self) -> ClientResult<Option<IdleConnection>> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(ClientError::PoolClosed);
        }
        while let Some(idle) = state.idle.pop_front() {
            let expired = self
                .inner
                .config
                .idle_timeout
                .map_or(false, |timeout| idle.since.elapsed() >= timeout);
            if !expired {
                return Ok(Some(idle));
            }
            state.total = state.total.saturating_sub(1);
        }
        Ok(None)
    }

    fn test_on_borrow(&self, idle: &mut IdleConnection) -> ClientResult<()> {
        if let Some(window) = self.inner.config.keep_alive {
            if idle.since.elapsed() < window {
                return Ok(());
            }
        }
        match idle.conn.exec(&["PING"])? {
            RespValue::Simple(_) | RespValue::Bulk(Some(_)) => Ok(()),
            RespValue::Error(message) => Err(server_error(message)),
            _ => Err(ClientError::Protocol("unexpected PING reply".into())),
        }
    }

    fn try_reserve(&self) -> ClientResult<bool> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(ClientError::PoolClosed);
        }
        if state.total >= self.inner.config.max_total {
            return Ok(false);
        }
        state.total += 1;
        Ok(true)
    }

    fn release_slot(&self) {
        let mut state = self.inner.state.lock();
        state.total = state.total.saturating_sub(1);
    }

    fn return_connection(&self, conn: Connection) {
        let mut state = self.inner.state.lock();
        if !state.closed && state.idle.len() < self.inner.config.max_idle {
            state.idle.push_back(IdleConnection {
                conn,
                since: Instant::now(),
            });
        } else {
            state.total = state.total.saturating_sub(1);
        }
    }
}

/// RAII wrapper returning a connection to the pool on drop.
///
/// A leased connection is used by exactly one logical operation at a time;
/// it is `Send` but deliberately not `Clone`.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
    pending: usize,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
            pending: 0,
        }
    }

    /// Executes one command as a single round trip.
    ///
    /// Commands still queued by `send` are flushed with it; their replies
    /// are read and discarded, and the reply to `args` is returned. Error
    /// replies come back as `ClientError::Server`.
    pub fn exec<A: AsRef<[u8]>>(&mut self, args: &[A]) -> ClientResult<RespValue> {
        self.send(args)?;
        self.flush()?;
        let mut first_err = None;
        let mut last = RespValue::Bulk(None);
        while self.pending > 0 {
            match self.receive() {
                Ok(value) => last = value,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(last),
        }
    }

    /// Queues one command without transmitting it.
    pub fn send<A: AsRef<[u8]>>(&mut self, args: &[A]) -> ClientResult<()> {
        let conn = self.conn.as_mut().ok_or(ClientError::PoolClosed)?;
        conn.queue(args);
        self.pending += 1;
        Ok(())
    }

    /// Transmits every queued command in one write.
    pub fn flush(&mut self) -> ClientResult<()> {
        let conn = self.conn.as_mut().ok_or(ClientError::PoolClosed)?;
        let result = conn.flush();
        if result.is_err() {
            self.valid = false;
        }
        result
    }

    /// Reads the reply to the oldest command not yet received.
    pub fn receive(&mut self) -> ClientResult<RespValue> {
        if self.pending == 0 {
            return Err(ClientError::Protocol("receive without a pending command".into()));
        }
        let conn = self.conn.as_mut().ok_or(ClientError::PoolClosed)?;
        match conn.read() {
            Ok(value) => {
                self.pending -= 1;
                match value {
                    RespValue::Error(message) => Err(server_error(message)),
                    value => Ok(value),
                }
            }
            Err(err) => {
                // If IO/protocol fails, do not return this connection to the pool.
                self.valid = false;
                Err(err)
            }
        }
    }

    /// Number of commands sent whose replies have not been received.
    pub fn pending(&self) -> usize {
        self.pending
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        let pool = ConnectionPool {
            inner: self.pool.clone(),
        };

        if self.valid && self.pending == 0 && conn.write_buf.is_empty() {
            pool.return_connection(conn);
        } else {
            debug!(pending = self.pending, "closing connection with unread replies");
            pool.release_slot();
        }
    }
}

/// Single TCP connection with reusable buffers.
///
/// The buffers are stored on the connection to avoid per-call allocations.
pub struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: BytesMut,
}

impl Connection {
    fn connect(config: &PoolConfig) -> ClientResult<Self> {
        let stream = connect_stream(config)?;
        if let Some(timeout) = config.read_timeout {
            stream.set_read_timeout(Some(timeout))?;
        }
        if let Some(timeout) = config.write_timeout {
            stream.set_write_timeout(Some(timeout))?;
        }
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        let mut conn = Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: BytesMut::with_capacity(256),
        };
        debug!(addr = %config.addr, database = config.database, "dialed store");

        if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
            conn.expect_ok(&["AUTH", password])?;
        }
        if config.database != 0 {
            conn.expect_ok(&["SELECT", config.database.to_string().as_str()])?;
        }
        Ok(conn)
    }

    fn queue<A: AsRef<[u8]>>(&mut self, args: &[A]) {
        encode_command(args, &mut self.write_buf);
    }

    fn flush(&mut self) -> ClientResult<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;
        self.write_buf.clear();
        Ok(())
    }

    fn read(&mut self) -> ClientResult<RespValue> {
        read_response(&mut self.reader, &mut self.line_buf)
    }

    fn exec<A: AsRef<[u8]>>(&mut self, args: &[A]) -> ClientResult<RespValue> {
        self.queue(args);
        self.flush()?;
        self.read()
    }

    fn expect_ok<A: AsRef<[u8]>>(&mut self, args: &[A]) -> ClientResult<()> {
        match self.exec(args)? {
            RespValue::Simple(_) => Ok(()),
            RespValue::Error(message) => Err(server_error(message)),
            _ => Err(ClientError::Protocol("expected a status reply".into())),
        }
    }
}

fn server_error(message: Vec<u8>) -> ClientError {
    ClientError::Server(String::from_utf8_lossy(&message).into_owned())
}

fn resolve_addr(addr: &str) -> ClientResult<SocketAddr> {
    addr.to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ClientError::InvalidAddress(addr.to_string()))
}

fn connect_stream(config: &PoolConfig) -> ClientResult<TcpStream> {
    let addr = resolve_addr(&config.addr)?;
    let stream = match config.connect_timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
        None => TcpStream::connect(addr)?,
    };
    Ok(stream)
}
