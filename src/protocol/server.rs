use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream},
    num::NonZeroUsize,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use log::{debug, error, info, warn};
use thiserror::Error;

use super::{ProtocolTransport, Request, Response, ThreadPool, transport::TransportError};

/// Business logic behind a server: turns one request into one response.
///
/// Implementations must always produce a response, using an `Error` outcome for their own
/// failures. Handlers for different connections run concurrently; any state they share needs
/// its own synchronization.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: Request) -> Response;
}

impl<F> Handler for F
where
    F: Fn(Request) -> Response + Send + Sync + 'static,
{
    fn handle(&self, request: Request) -> Response {
        self(request)
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn accept thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("accept loop for '{0}' panicked")]
    AcceptLoopPanicked(String),
}

/// How accepted connections are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Concurrency {
    /// A new thread for every connection, with no admission limit.
    #[default]
    Unbounded,
    /// A fixed pool of worker threads; excess connections wait in its queue.
    Bounded(NonZeroUsize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Listening(SocketAddr),
}

/// Result of [`Server::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(SocketAddr),
    AlreadyListening(SocketAddr),
}

impl StartOutcome {
    pub fn local_addr(&self) -> SocketAddr {
        match self {
            StartOutcome::Started(addr) | StartOutcome::AlreadyListening(addr) => *addr,
        }
    }
}

#[derive(Clone)]
enum Workers {
    Unbounded,
    Pool(Arc<ThreadPool>),
}

impl Workers {
    fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self {
            Workers::Unbounded => {
                if let Err(e) = thread::Builder::new().spawn(f) {
                    error!("failed to spawn connection worker: {e}");
                }
            }
            Workers::Pool(pool) => pool.execute(f),
        }
    }
}

struct Listening {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    accept_thread: JoinHandle<()>,
}

/// One-request-per-connection RPC server.
///
/// `start` binds the listener and runs the accept loop on its own thread; each accepted
/// connection is served by a worker that reads one request, calls the [`Handler`], writes the
/// response and closes the connection.
pub struct Server<H: Handler> {
    identity: String,
    address: SocketAddr,
    handler: Arc<H>,
    workers: Workers,
    listening: Mutex<Option<Listening>>,
}

impl<H: Handler> Server<H> {
    pub fn new(identity: impl Into<String>, address: SocketAddr, handler: H) -> Self {
        Self {
            identity: identity.into(),
            address,
            handler: Arc::new(handler),
            workers: Workers::Unbounded,
            listening: Mutex::new(None),
        }
    }

    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.workers = match concurrency {
            Concurrency::Unbounded => Workers::Unbounded,
            Concurrency::Bounded(size) => Workers::Pool(Arc::new(ThreadPool::new(size))),
        };
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> ServerState {
        match self.slot().as_ref() {
            Some(listening) => ServerState::Listening(listening.local_addr),
            None => ServerState::Stopped,
        }
    }

    /// Binds the listener and starts accepting. A second call while listening is a no-op
    /// that reports the existing address.
    pub fn start(&self) -> Result<StartOutcome, ServerError> {
        let mut slot = self.slot();
        if let Some(listening) = slot.as_ref() {
            info!("{} server is already running", self.identity);
            return Ok(StartOutcome::AlreadyListening(listening.local_addr));
        }

        let listener = TcpListener::bind(self.address).map_err(|source| ServerError::Bind {
            address: self.address,
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            address: self.address,
            source,
        })?;
        let running = Arc::new(AtomicBool::new(true));

        let accept_thread = {
            let identity = self.identity.clone();
            let running = Arc::clone(&running);
            let handler = Arc::clone(&self.handler);
            let workers = self.workers.clone();
            thread::Builder::new()
                .name(format!("{}-accept", self.identity))
                .spawn(move || accept_loop(identity, listener, running, handler, workers))
                .map_err(ServerError::Spawn)?
        };

        info!("{} server started on {local_addr}", self.identity);
        *slot = Some(Listening {
            local_addr,
            running,
            accept_thread,
        });
        Ok(StartOutcome::Started(local_addr))
    }

    /// Stops accepting new connections. In-flight connections run to completion.
    pub fn stop(&self) -> Result<(), ServerError> {
        let Some(listening) = self.slot().take() else {
            info!("{} server is not running", self.identity);
            return Ok(());
        };

        info!("stopping {} server...", self.identity);
        listening.running.store(false, Ordering::SeqCst);
        // Wake the blocking accept so the loop observes the flag.
        if let Err(e) = TcpStream::connect(wake_address(listening.local_addr)) {
            debug!("wake-up connection failed: {e}");
        }

        listening
            .accept_thread
            .join()
            .map_err(|_| ServerError::AcceptLoopPanicked(self.identity.clone()))?;
        info!("{} server stopped", self.identity);
        Ok(())
    }

    fn slot(&self) -> MutexGuard<'_, Option<Listening>> {
        self.listening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<H: Handler> Drop for Server<H> {
    fn drop(&mut self) {
        if self.state() == ServerState::Stopped {
            return;
        }
        if let Err(e) = self.stop() {
            warn!("{e}");
        }
    }
}

fn wake_address(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv6Addr::LOCALHOST.into(), addr.port())
        }
        _ => addr,
    }
}

fn accept_loop<H: Handler>(
    identity: String,
    listener: TcpListener,
    running: Arc<AtomicBool>,
    handler: Arc<H>,
    workers: Workers,
) {
    for stream in listener.incoming() {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        match stream {
            Ok(stream) => {
                let handler = Arc::clone(&handler);
                let identity = identity.clone();
                workers.execute(move || {
                    if let Err(e) = handle_connection(stream, handler.as_ref()) {
                        error!("{identity}: failed to handle connection: {e}");
                    }
                });
            }
            Err(e) => warn!("broken connection: {e:?}"),
        }
    }
    debug!("{identity} accept loop exited");
}

fn handle_connection<H: Handler>(stream: TcpStream, handler: &H) -> Result<(), TransportError> {
    let peer = stream.peer_addr().ok();
    let mut transport = ProtocolTransport::new(stream);

    let req = match transport.read_request() {
        Ok(req) => req,
        Err(e) if e.is_disconnect() => {
            warn!("dropping connection from {peer:?}: no complete request");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    debug!("received request: {req:?}");

    let resp = handler.handle(req);
    transport.write_response(&resp)?;
    Ok(())
}
