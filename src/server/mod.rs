// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus TCP server.

mod memory;
mod service;

pub use self::{memory::MemoryHandler, service::Handler};

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures_util::{sink::SinkExt as _, stream::StreamExt as _};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::{codec::Framed, sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    client::tcp::configure_stream,
    codec::tcp::ServerCodec,
    error::Result,
    frame::tcp::{RequestAdu, ResponseAdu},
    metrics::ServerMetrics,
};

/// Configuration of a [`Server`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub(crate) max_conns: usize,
    pub(crate) read_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_conns: 100,
            read_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the ceiling on accepted concurrent connections; additional
    /// accepts are closed immediately. Default: 100.
    #[must_use]
    pub fn max_conns(mut self, max_conns: usize) -> Self {
        self.max_conns = max_conns;
        self
    }

    /// Sets the per-read idle deadline on each connection; a connection
    /// that stays silent longer is closed. Zero disables the deadline.
    /// Default: 30 s.
    #[must_use]
    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

#[derive(Debug)]
struct Shared {
    metrics: ServerMetrics,
    closed: AtomicBool,
    cancel: CancellationToken,
    active: AtomicUsize,
    local_addr: Mutex<Option<SocketAddr>>,
}

/// A Modbus TCP server dispatching requests to a shared [`Handler`].
///
/// The server is cheap to clone; all clones drive the same instance.
#[derive(Clone)]
pub struct Server {
    handler: Arc<dyn Handler>,
    opts: ServerOptions,
    shared: Arc<Shared>,
    tracker: TaskTracker,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("opts", &self.opts)
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a new server for the given handler.
    #[must_use]
    pub fn new(handler: Arc<dyn Handler>, options: ServerOptions) -> Self {
        Self {
            handler,
            opts: options,
            shared: Arc::new(Shared {
                metrics: ServerMetrics::default(),
                closed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                active: AtomicUsize::new(0),
                local_addr: Mutex::new(None),
            }),
            tracker: TaskTracker::new(),
        }
    }

    /// Binds a TCP listener and serves until [`close`](Self::close) is
    /// called.
    pub async fn listen_and_serve(&self, addr: impl ToSocketAddrs) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Binds a TCP listener and serves until the given token is
    /// cancelled or [`close`](Self::close) is called.
    pub async fn listen_and_serve_until(
        &self,
        addr: impl ToSocketAddrs,
        signal: CancellationToken,
    ) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        let server = self.clone();
        tokio::spawn(async move {
            signal.cancelled().await;
            server.close().await;
        });
        self.serve(listener).await
    }

    /// Drives the accept loop on an existing listener until
    /// [`close`](Self::close) is called.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        *self.shared.local_addr.lock().expect("local addr lock") = Some(local_addr);
        info!(addr = %local_addr, "server started");

        loop {
            let (stream, peer) = tokio::select! {
                () = self.shared.cancel.cancelled() => break,
                res = listener.accept() => match res {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        if self.shared.closed.load(Ordering::SeqCst) {
                            break;
                        }
                        error!(error = %err, "accept error");
                        continue;
                    }
                },
            };

            if self.shared.active.load(Ordering::SeqCst) >= self.opts.max_conns {
                warn!(remote = %peer, "max connections reached, rejecting");
                drop(stream);
                continue;
            }

            if let Err(err) = configure_stream(&stream) {
                debug!(remote = %peer, error = %err, "socket configuration failed");
            }

            self.shared.active.fetch_add(1, Ordering::SeqCst);
            self.shared.metrics.active_conns.add(1);
            self.shared.metrics.total_conns.inc();

            let shared = Arc::clone(&self.shared);
            let handler = Arc::clone(&self.handler);
            let read_timeout = self.opts.read_timeout;
            self.tracker.spawn(async move {
                // Decrements the connection accounting even if the
                // worker panics; panics stay confined to the task.
                let _guard = ConnGuard(Arc::clone(&shared));
                handle_connection(shared, handler, stream, peer, read_timeout).await;
            });
        }

        info!(addr = %local_addr, "accept loop stopped");
        Ok(())
    }

    /// Shuts the server down.
    ///
    /// Idempotent. Stops the accept loop, closes all active
    /// connections, and waits for the per-connection workers to finish
    /// their in-flight requests.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            // Still wait for the workers so every caller observes
            // completion.
            self.tracker.wait().await;
            return;
        }
        self.shared.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("server stopped");
    }

    /// Returns the bound address while serving.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock().expect("local addr lock")
    }

    /// Returns the number of active connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Returns the embedded metrics.
    #[must_use]
    pub fn metrics(&self) -> &ServerMetrics {
        &self.shared.metrics
    }
}

struct ConnGuard(Arc<Shared>);

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
        self.0.metrics.active_conns.add(-1);
    }
}

/// The per-connection request/response loop.
async fn handle_connection(
    shared: Arc<Shared>,
    handler: Arc<dyn Handler>,
    stream: TcpStream,
    peer: SocketAddr,
    read_timeout: Duration,
) {
    debug!(remote = %peer, "connection accepted");
    let mut framed = Framed::new(stream, ServerCodec);

    loop {
        if shared.closed.load(Ordering::SeqCst) {
            break;
        }

        let next = tokio::select! {
            () = shared.cancel.cancelled() => break,
            next = read_request(&mut framed, read_timeout) => next,
        };
        let adu = match next {
            Read::Request(adu) => adu,
            Read::Eof => {
                debug!(remote = %peer, "connection closed by peer");
                break;
            }
            Read::Timeout => {
                debug!(remote = %peer, "read timeout, closing idle connection");
                break;
            }
            Read::Failed(err) => {
                debug!(remote = %peer, error = %err, "read error");
                break;
            }
        };

        shared.metrics.requests_total.inc();

        let RequestAdu { hdr, pdu } = adu;
        debug!(
            remote = %peer,
            tx_id = hdr.transaction_id,
            unit_id = hdr.unit_id,
            "processing request"
        );
        let rsp_pdu = service::dispatch(handler.as_ref(), hdr.unit_id, &pdu).await;
        let rsp = ResponseAdu { hdr, pdu: rsp_pdu };

        let write = async {
            if read_timeout.is_zero() {
                framed.send(rsp).await
            } else {
                match tokio::time::timeout(read_timeout, framed.send(rsp)).await {
                    Ok(res) => res,
                    Err(_) => Err(crate::error::Error::Timeout),
                }
            }
        };
        if let Err(err) = write.await {
            shared.metrics.requests_errors.inc();
            debug!(remote = %peer, error = %err, "write error");
            break;
        }

        shared.metrics.requests_success.inc();
    }

    debug!(remote = %peer, "connection closed");
}

enum Read {
    Request(RequestAdu),
    Eof,
    Timeout,
    Failed(crate::error::Error),
}

async fn read_request(
    framed: &mut Framed<TcpStream, ServerCodec>,
    read_timeout: Duration,
) -> Read {
    let next = if read_timeout.is_zero() {
        framed.next().await
    } else {
        match tokio::time::timeout(read_timeout, framed.next()).await {
            Ok(next) => next,
            Err(_) => return Read::Timeout,
        }
    };
    match next {
        Some(Ok(adu)) => Read::Request(adu),
        Some(Err(err)) => Read::Failed(err),
        None => Read::Eof,
    }
}
