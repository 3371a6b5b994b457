//! Cross-process result channel.
//!
//! A [`ChannelManager`] owns a two-entry mapping (`counter`, `records`) and
//! serves it on a loopback TCP port. Any process that knows the address can
//! connect a [`ChannelClient`] and `put`/`get` against it. The wire format is
//! one JSON object per line in each direction.
//!
//! `put` waits for the server's acknowledgement, so once a writer process
//! has exited every put it made is visible to `snapshot()` in the manager's
//! process. That exit is the only synchronization barrier readers need.
//!
//! The manager must be started before use and stopped afterwards;
//! [`ChannelManager::scoped`] and `Drop` make the stop unconditional. Stopping
//! also closes every open connection, so no client can touch the mapping once
//! `shutdown` has returned.

use memfault_core::MemoryInfo;
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Client sockets give up on a silent server after this long.
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Contents of the shared mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    /// Last call counter written.
    pub counter: u64,
    /// Every record written, in write order.
    pub records: Vec<MemoryInfo>,
}

/// Channel failure.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Socket trouble.
    #[error("channel i/o: {0}")]
    Io(#[from] io::Error),
    /// Undecodable line.
    #[error("channel codec: {0}")]
    Codec(#[from] serde_json::Error),
    /// The server rejected the request.
    #[error("channel server: {0}")]
    Server(String),
    /// The server hung up before replying.
    #[error("channel closed by server")]
    Closed,
    /// Reply of the wrong kind.
    #[error("unexpected channel reply: {0}")]
    Unexpected(String),
}

/// Destination for the proxy's per-call writes.
pub trait ResultSink: Send {
    /// Overwrite the counter and append `record`.
    fn put(&mut self, counter: u64, record: &MemoryInfo) -> Result<(), ChannelError>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    Put { counter: u64, record: MemoryInfo },
    Get,
    Clear,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Reply {
    Ok,
    Snapshot {
        counter: u64,
        records: Vec<MemoryInfo>,
    },
    Error {
        message: String,
    },
}

type SharedState = Arc<Mutex<ChannelSnapshot>>;

/// An accepted connection: a handle on its socket and the thread serving it.
#[derive(Debug)]
struct Connection {
    stream: TcpStream,
    thread: JoinHandle<()>,
}

type Connections = Arc<Mutex<Vec<Connection>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn write_line<T: Serialize>(w: &mut impl Write, msg: &T) -> Result<(), ChannelError> {
    let mut line = serde_json::to_vec(msg)?;
    line.push(b'\n');
    w.write_all(&line)?;
    w.flush()?;
    Ok(())
}

/// Owner and server of the shared mapping.
#[derive(Debug)]
pub struct ChannelManager {
    addr: SocketAddr,
    state: SharedState,
    connections: Connections,
    stopping: Arc<AtomicBool>,
    server: Option<JoinHandle<()>>,
}

impl ChannelManager {
    /// Bind an ephemeral loopback port and start serving.
    pub fn start() -> Result<Self, ChannelError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        let addr = listener.local_addr()?;
        let state = SharedState::default();
        let connections = Connections::default();
        let stopping = Arc::new(AtomicBool::new(false));

        let server = thread::Builder::new().name("memfault-channel".into()).spawn({
            let state = Arc::clone(&state);
            let connections = Arc::clone(&connections);
            let stopping = Arc::clone(&stopping);
            move || serve(&listener, &state, &connections, &stopping)
        })?;
        info!(%addr, "result channel started");

        Ok(Self {
            addr,
            state,
            connections,
            stopping,
            server: Some(server),
        })
    }

    /// Start a manager, run `f`, and stop the manager whatever `f` returned.
    pub fn scoped<T, E, F>(f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<ChannelError>,
    {
        let mgr = Self::start()?;
        let out = f(&mgr);
        let stopped = mgr.shutdown();
        let value = out?;
        stopped?;
        Ok(value)
    }

    /// Address to hand to writers.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connect a client to this manager.
    pub fn connect(&self) -> Result<ChannelClient, ChannelError> {
        ChannelClient::connect(self.addr)
    }

    /// Current contents (the in-process `get`).
    #[must_use]
    pub fn snapshot(&self) -> ChannelSnapshot {
        lock(&self.state).clone()
    }

    /// Empty the mapping.
    pub fn clear(&self) {
        *lock(&self.state) = ChannelSnapshot::default();
    }

    /// Stop accepting connections, close the open ones, and join every
    /// server thread.
    pub fn shutdown(mut self) -> Result<(), ChannelError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), ChannelError> {
        let Some(server) = self.server.take() else {
            return Ok(());
        };
        self.stopping.store(true, Ordering::SeqCst);
        // Wake the blocking accept so it sees the flag.
        if let Err(e) = TcpStream::connect(self.addr) {
            debug!(error = %e, "wake-up connect failed");
        }
        server
            .join()
            .map_err(|_| ChannelError::Server("server thread panicked".into()))?;

        // The accept loop has exited, so this list can no longer grow.
        let open = std::mem::take(&mut *lock(&self.connections));
        let mut panicked = false;
        for conn in open {
            if let Err(e) = conn.stream.shutdown(Shutdown::Both) {
                debug!(error = %e, "closing channel connection");
            }
            panicked |= conn.thread.join().is_err();
        }
        if panicked {
            return Err(ChannelError::Server("connection thread panicked".into()));
        }
        info!(addr = %self.addr, "result channel stopped");
        Ok(())
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "stopping result channel");
        }
    }
}

fn serve(
    listener: &TcpListener,
    state: &SharedState,
    connections: &Mutex<Vec<Connection>>,
    stopping: &AtomicBool,
) {
    for conn in listener.incoming() {
        if stopping.load(Ordering::SeqCst) {
            break;
        }
        let stream = match conn {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "channel accept failed");
                continue;
            }
        };
        let handle = match stream.try_clone() {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "cannot track channel connection");
                continue;
            }
        };
        let state = Arc::clone(state);
        let spawned = thread::Builder::new()
            .name("memfault-channel-conn".into())
            .spawn(move || {
                if let Err(e) = handle_conn(stream, &state) {
                    debug!(error = %e, "channel connection ended");
                }
            });
        match spawned {
            Ok(thread) => {
                let mut open = lock(connections);
                open.retain(|c| !c.thread.is_finished());
                open.push(Connection {
                    stream: handle,
                    thread,
                });
            }
            Err(e) => warn!(error = %e, "cannot serve channel connection"),
        }
    }
}

fn handle_conn(stream: TcpStream, state: &Mutex<ChannelSnapshot>) -> Result<(), ChannelError> {
    let mut writer = stream.try_clone()?;
    for line in BufReader::new(stream).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<Request>(&line) {
            Ok(req) => apply(req, state),
            Err(e) => Reply::Error {
                message: format!("bad request: {e}"),
            },
        };
        write_line(&mut writer, &reply)?;
    }
    Ok(())
}

fn apply(req: Request, state: &Mutex<ChannelSnapshot>) -> Reply {
    let mut s = lock(state);
    match req {
        Request::Put { counter, record } => {
            s.counter = counter;
            s.records.push(record);
            Reply::Ok
        }
        Request::Get => Reply::Snapshot {
            counter: s.counter,
            records: s.records.clone(),
        },
        Request::Clear => {
            *s = ChannelSnapshot::default();
            Reply::Ok
        }
    }
}

/// Connection to a [`ChannelManager`], usable from any process.
#[derive(Debug)]
pub struct ChannelClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl ChannelClient {
    /// Connect to the manager at `addr`.
    pub fn connect(addr: SocketAddr) -> Result<Self, ChannelError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(REPLY_TIMEOUT))?;
        let writer = stream.try_clone()?;
        debug!(%addr, "result channel client connected");
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    /// Overwrite the counter and append `record`; returns once applied.
    pub fn put(&mut self, counter: u64, record: &MemoryInfo) -> Result<(), ChannelError> {
        match self.call(&Request::Put {
            counter,
            record: *record,
        })? {
            Reply::Ok => Ok(()),
            other => Err(ChannelError::Unexpected(format!("{other:?}"))),
        }
    }

    /// Read the whole mapping.
    pub fn get(&mut self) -> Result<ChannelSnapshot, ChannelError> {
        match self.call(&Request::Get)? {
            Reply::Snapshot { counter, records } => Ok(ChannelSnapshot { counter, records }),
            other => Err(ChannelError::Unexpected(format!("{other:?}"))),
        }
    }

    /// Empty the mapping.
    pub fn clear(&mut self) -> Result<(), ChannelError> {
        match self.call(&Request::Clear)? {
            Reply::Ok => Ok(()),
            other => Err(ChannelError::Unexpected(format!("{other:?}"))),
        }
    }

    fn call(&mut self, req: &Request) -> Result<Reply, ChannelError> {
        write_line(&mut self.writer, req)?;
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(ChannelError::Closed);
        }
        match serde_json::from_str(&line)? {
            Reply::Error { message } => Err(ChannelError::Server(message)),
            reply => Ok(reply),
        }
    }
}

impl ResultSink for ChannelClient {
    fn put(&mut self, counter: u64, record: &MemoryInfo) -> Result<(), ChannelError> {
        Self::put(self, counter, record)
    }
}
