//! Server lifecycle.
//!
//! # Responsibilities
//! - Bind the listener and run the accept loop on a background worker
//! - Funnel unexpected listener failures into a must-stop signal
//! - Stop in a fixed sequence: stop flag, bounded drain of connections,
//!   error queue closure, worker exit
//!
//! # Design Decisions
//! - The server never stops itself; a listener failure only asks the owner
//!   to call [`Server::stop`]
//! - `stop` takes `&mut self`, so concurrent stops cannot compile
//! - Connections still open when the drain timeout expires are aborted,
//!   which closes their sockets (idle tunnels included)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::ProxyConfig;
use crate::http::Dispatcher;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError};
use crate::security::work_mode::WorkMode;

/// Capacity of the listener error queue.
const ERROR_QUEUE_CAPACITY: usize = 8;

/// Lifecycle states, in the only order they are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Error type for lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("Server is {current:?}, expected {expected:?}")]
    InvalidState {
        current: LifecycleState,
        expected: LifecycleState,
    },
}

/// The proxy server.
pub struct Server {
    config: ProxyConfig,
    dispatcher: Arc<Dispatcher>,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
    state: LifecycleState,
    local_addr: Option<SocketAddr>,
    errors_tx: Option<mpsc::Sender<ListenerError>>,
    stop_requests: Option<mpsc::Receiver<ListenerError>>,
    listener_worker: Option<JoinHandle<()>>,
    error_worker: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(config: ProxyConfig, mode: WorkMode) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(&config, mode));
        Self {
            config,
            dispatcher,
            tracker: ConnectionTracker::new(),
            shutdown: Shutdown::new(),
            state: LifecycleState::Idle,
            local_addr: None,
            errors_tx: None,
            stop_requests: None,
            listener_worker: None,
            error_worker: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Receiver for listener failures that require the owner to stop the
    /// server. Available once, after [`Server::start`].
    pub fn take_stop_requests(&mut self) -> Option<mpsc::Receiver<ListenerError>> {
        self.stop_requests.take()
    }

    /// Bind the listener and start the background workers.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        self.expect_state(LifecycleState::Idle)?;

        let listener = Listener::bind(&self.config.listener).await?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        let (errors_tx, errors_rx) = mpsc::channel(ERROR_QUEUE_CAPACITY);
        let (stop_tx, stop_rx) = mpsc::channel(1);

        self.listener_worker = Some(tokio::spawn(run_listener(
            listener,
            Arc::clone(&self.dispatcher),
            self.tracker.clone(),
            self.shutdown.clone(),
            self.shutdown.subscribe(),
            errors_tx.clone(),
            self.config.timeouts.shutdown(),
        )));
        self.error_worker = Some(tokio::spawn(drain_errors(errors_rx, stop_tx)));

        self.errors_tx = Some(errors_tx);
        self.stop_requests = Some(stop_rx);
        self.local_addr = Some(local_addr);
        self.state = LifecycleState::Running;

        tracing::info!(
            address = %local_addr,
            mode = self.dispatcher.guard().mode().name(),
            "Proxy server started"
        );
        Ok(())
    }

    /// Stop accepting, drain connections within the shutdown timeout and
    /// wait for the background workers to exit.
    pub async fn stop(&mut self) -> Result<(), ServerError> {
        self.expect_state(LifecycleState::Running)?;
        self.state = LifecycleState::Stopping;
        tracing::info!("Stopping proxy server");

        self.shutdown.set_stopping();
        self.shutdown.trigger();

        if let Some(worker) = self.listener_worker.take() {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Listener worker failed");
            }
        }

        // Closes the error queue once the listener's sender is gone too.
        self.errors_tx = None;

        if let Some(worker) = self.error_worker.take() {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Error worker failed");
            }
        }

        self.state = LifecycleState::Stopped;
        tracing::info!("Proxy server stopped");
        Ok(())
    }

    fn expect_state(&self, expected: LifecycleState) -> Result<(), ServerError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ServerError::InvalidState {
                current: self.state,
                expected,
            })
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.state == LifecycleState::Running {
            self.shutdown.set_stopping();
            self.shutdown.trigger();
        }
    }
}

/// Accept loop. Runs until shutdown is triggered or the listener fails.
async fn run_listener(
    listener: Listener,
    dispatcher: Arc<Dispatcher>,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
    mut shutdown_rx: broadcast::Receiver<()>,
    errors: mpsc::Sender<ListenerError>,
    drain_timeout: Duration,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, peer, permit)) => {
                    let dispatcher = Arc::clone(&dispatcher);
                    let conn = tracker.track(peer);
                    connections.spawn(async move {
                        let _permit = permit;
                        dispatcher.handle(stream, conn).await;
                    });
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(error = %e, "Accept failed for one connection");
                }
                Err(e) => {
                    if !shutdown.is_stopping() {
                        tracing::error!(error = %e, "Listener failed");
                        let _ = errors.send(e).await;
                    }
                    break;
                }
            }
        }
    }

    drop(listener);
    drop(errors);
    drain_connections(connections, drain_timeout).await;
    tracing::debug!("Listener worker exited");
}

/// Wait for connection tasks up to `timeout`, then abort the rest.
async fn drain_connections(mut connections: JoinSet<()>, timeout: Duration) {
    if connections.is_empty() {
        return;
    }

    tracing::info!(connections = connections.len(), "Draining connections");
    let drained = tokio::time::timeout(timeout, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            connections = connections.len(),
            timeout_secs = timeout.as_secs(),
            "Drain timed out, closing remaining connections"
        );
        connections.shutdown().await;
    }
}

/// Forward listener failures to the must-stop channel until the queue closes.
async fn drain_errors(
    mut errors: mpsc::Receiver<ListenerError>,
    stop_requests: mpsc::Sender<ListenerError>,
) {
    while let Some(e) = errors.recv().await {
        tracing::error!(error = %e, "Listener failure, requesting stop");
        let _ = stop_requests.try_send(e);
    }
}
