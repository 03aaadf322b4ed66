//! TCP acceptor for remote-control connections.
//!
//! Binds the listening socket, then accepts connections and spawns one task
//! per connection. It never executes commands itself: handlers queue work for
//! the host thread and wait for the reply.

use crate::config::Config;
use crate::connection::{handle_connection, ConnectionOutcome, ConnectionSettings};
use crate::handoff::HandoffQueue;
use std::future::Future;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

/// Pause after a failed accept before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// How long in-flight connections get to finish after shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Fatal errors acquiring or keeping the listening socket.
#[derive(Debug, Error)]
pub enum BindError {
    #[error("failed to resolve listen address '{addr}': {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("listen address '{0}' resolved to nothing")]
    ResolveEmpty(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to start server runtime: {0}")]
    Runtime(#[source] io::Error),
    #[error("acceptor stopped before shutdown was requested")]
    AcceptorExited,
}

/// A bound, not yet running, acceptor.
pub struct Server {
    listener: std::net::TcpListener,
    local_addr: SocketAddr,
    queue: Arc<HandoffQueue>,
    settings: Arc<ConnectionSettings>,
}

impl Server {
    /// Bind the configured address. Binding happens here, synchronously, so
    /// failure is reported before anything is spawned.
    pub fn bind(config: &Config, queue: Arc<HandoffQueue>) -> Result<Self, BindError> {
        let addr = resolve(&config.listen)?;
        let listener = create_listener(addr, config.backlog)
            .map_err(|source| BindError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| BindError::Bind { addr, source })?;

        info!(address = %local_addr, "Server listening");

        Ok(Server {
            listener,
            local_addr,
            queue,
            settings: Arc::new(config.connection_settings()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` resolves, then give in-flight
    /// connections a grace period to finish.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn run<F>(self, shutdown: F) -> Result<(), BindError>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::from_std(self.listener).map_err(|source| BindError::Bind {
            addr: self.local_addr,
            source,
        })?;
        let mut connections = JoinSet::new();
        let mut last_error = None::<io::ErrorKind>;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        last_error = None;
                        trace!(peer = %peer, "New connection");
                        let queue = Arc::clone(&self.queue);
                        let settings = Arc::clone(&self.settings);
                        connections.spawn(async move {
                            match handle_connection(stream, &queue, &settings).await {
                                Ok(ConnectionOutcome::Responded(status)) => {
                                    trace!(peer = %peer, ?status, "Connection answered");
                                }
                                Ok(ConnectionOutcome::PeerClosed) => {}
                                Err(e) => debug!(peer = %peer, error = %e, "Connection error"),
                            }
                        });
                    }
                    Err(e) => {
                        if last_error != Some(e.kind()) {
                            warn!(error = %e, "Failed to accept connection");
                        }
                        last_error = Some(e.kind());
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                // Reap finished connection tasks so the set stays small
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(listener);
        info!(in_flight = connections.len(), "Server stopped accepting");

        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                aborted = connections.len(),
                "Aborting connections still open after shutdown grace period"
            );
            connections.shutdown().await;
        }
        Ok(())
    }

    /// Run the acceptor on a dedicated thread with its own tokio runtime.
    ///
    /// When `interrupt` is given, Ctrl-C sets it so the host loop can begin
    /// an orderly shutdown. It is also set when the acceptor thread exits for
    /// any reason, including a panic.
    pub fn spawn(self, interrupt: Option<Arc<AtomicBool>>) -> Result<ServerHandle, BindError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("relay-net")
            .enable_all()
            .build()
            .map_err(BindError::Runtime)?;

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let finished = Arc::new(AtomicBool::new(false));
        let local_addr = self.local_addr;

        let exit = ExitSignal {
            finished: Arc::clone(&finished),
            interrupt: interrupt.clone(),
        };

        let thread = thread::Builder::new()
            .name("relay-acceptor".to_string())
            .spawn(move || {
                let _exit = exit;
                runtime.block_on(async move {
                    if let Some(interrupt) = interrupt {
                        tokio::spawn(async move {
                            if tokio::signal::ctrl_c().await.is_ok() {
                                info!("Interrupt received, shutting down");
                                interrupt.store(true, Ordering::Release);
                            }
                        });
                    }
                    let shutdown = async {
                        // A dropped sender also means stop
                        let _ = stop_rx.await;
                    };
                    if let Err(e) = self.run(shutdown).await {
                        error!(error = %e, "Server failed");
                    }
                });
            })
            .map_err(BindError::Runtime)?;

        Ok(ServerHandle {
            local_addr,
            stop: Some(stop_tx),
            finished,
            thread: Some(thread),
        })
    }
}

/// Raises the acceptor's exit flags when dropped, on return or unwind.
struct ExitSignal {
    finished: Arc<AtomicBool>,
    interrupt: Option<Arc<AtomicBool>>,
}

impl Drop for ExitSignal {
    fn drop(&mut self) {
        self.finished.store(true, Ordering::Release);
        if let Some(interrupt) = &self.interrupt {
            interrupt.store(true, Ordering::Release);
        }
    }
}

/// Controls an acceptor started with [`Server::spawn`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    finished: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting. In-flight connections keep running, so the host loop
    /// must keep draining until [`ServerHandle::finished`] is set.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    /// Set once the acceptor thread has wound down.
    pub fn finished(&self) -> &AtomicBool {
        &self.finished
    }

    /// Whether the acceptor thread ended without [`ServerHandle::stop`]
    /// being called.
    pub fn exited_early(&self) -> bool {
        self.stop.is_some() && self.finished.load(Ordering::Acquire)
    }

    /// Wait for the acceptor thread to exit.
    pub fn join(mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Acceptor thread panicked");
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn resolve(listen: &str) -> Result<SocketAddr, BindError> {
    listen
        .to_socket_addrs()
        .map_err(|source| BindError::Resolve {
            addr: listen.to_string(),
            source,
        })?
        .next()
        .ok_or_else(|| BindError::ResolveEmpty(listen.to_string()))
}

fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}
