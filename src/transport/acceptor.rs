//! # Connection Acceptor
//!
//! Listens for inbound TCP connections and queues each one, unauthenticated
//! and unframed, until the caller claims it.
//!
//! The accept loop runs on its own task. Claiming is non-blocking
//! ([`Acceptor::take_pending`]); callers that expect a connection wait on the
//! enqueue notification with a bound ([`Acceptor::wait_pending`]).
//!
//! ## Backpressure
//! At most `backpressure_limit` connections are held unclaimed. Connections
//! arriving while the queue is full are closed immediately.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{AcceptorConfig, LinkConfig, TlsConfig};
use crate::error::{ProtocolError, Result};
use crate::transport::connection::Connection;
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::{with_timeout_error, SHUTDOWN_TIMEOUT};

/// Pause after a failed `accept` before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

struct Shared {
    queue: Mutex<VecDeque<Connection>>,
    enqueued: Notify,
    limit: usize,
    tls: TlsConfig,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, VecDeque<Connection>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Accepts inbound connections and holds them until claimed.
pub struct Acceptor {
    local_addr: SocketAddr,
    pending_wait: Duration,
    shared: Arc<Shared>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Acceptor {
    /// Bind the listening socket and start accepting.
    pub async fn bind(config: &AcceptorConfig) -> Result<Self> {
        Self::bind_with_tls(config, TlsConfig::default()).await
    }

    /// Bind from a full [`LinkConfig`]. Every accepted connection starts with
    /// the link's TLS settings applied.
    pub async fn from_config(config: &LinkConfig) -> Result<Self> {
        config.validate_strict()?;
        Self::bind_with_tls(&config.acceptor, config.tls).await
    }

    #[instrument(skip(config), fields(address = %config.address))]
    async fn bind_with_tls(config: &AcceptorConfig, tls: TlsConfig) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(ProtocolError::ConfigError(errors.join("; ")));
        }

        let listener = TcpListener::bind(config.address.as_str()).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "Listening for peer connections");

        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            enqueued: Notify::new(),
            limit: config.backpressure_limit,
            tls,
        });
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(accept_loop(listener, shared.clone(), shutdown_rx));

        Ok(Self {
            local_addr,
            pending_wait: config.pending_wait,
            shared,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Bind to `addr` with default settings otherwise
    pub async fn bind_addr(addr: SocketAddr) -> Result<Self> {
        let config = AcceptorConfig {
            address: addr.to_string(),
            ..AcceptorConfig::default()
        };
        Self::bind(&config).await
    }

    /// The bound address (useful after binding to port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether at least one accepted connection is waiting to be claimed
    pub fn has_pending(&self) -> bool {
        !self.shared.queue().is_empty()
    }

    /// Number of accepted connections waiting to be claimed
    pub fn pending_count(&self) -> usize {
        self.shared.queue().len()
    }

    /// Claim the oldest queued connection.
    ///
    /// The connection is plaintext and `Idle`. Fails with
    /// [`ProtocolError::NoPendingConnection`] if the queue is empty.
    pub fn take_pending(&self) -> Result<Connection> {
        self.shared
            .queue()
            .pop_front()
            .ok_or(ProtocolError::NoPendingConnection)
    }

    /// Wait until a connection is queued, failing with
    /// [`ProtocolError::Timeout`] after `timeout`.
    pub async fn wait_pending(&self, timeout: Duration) -> Result<()> {
        let shared = &self.shared;
        let wait = async {
            loop {
                let notified = shared.enqueued.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if !shared.queue().is_empty() {
                    return Ok(());
                }
                notified.await;
            }
        };
        with_timeout_error(wait, timeout).await
    }

    /// Wait up to the configured `pending_wait` for a connection, then claim it.
    pub async fn next_pending(&self) -> Result<Connection> {
        self.wait_pending(self.pending_wait).await?;
        self.take_pending()
    }

    /// Stop accepting. Connections already queued remain claimable.
    pub async fn shutdown(&mut self) {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return;
        };
        let _ = shutdown_tx.send(()).await;

        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut task).await.is_err() {
                warn!("Accept loop did not stop in time; aborting");
                task.abort();
            }
        }
        info!(local_addr = %self.local_addr, "Acceptor shut down");
        global_metrics().log_metrics();
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Accept loop stopping");
                return;
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        if shared.queue().len() >= shared.limit {
                            warn!(%peer, limit = shared.limit, "Pending queue full; dropping connection");
                            global_metrics().connection_rejected();
                            drop(stream);
                            continue;
                        }

                        match Connection::from_tcp(stream) {
                            Ok(mut connection) => {
                                connection.apply_tls_config(&shared.tls);
                                debug!(%peer, "Connection queued");
                                shared.queue().push_back(connection);
                                shared.enqueued.notify_waiters();
                            }
                            Err(e) => {
                                warn!(%peer, error = %e, "Accepted connection unusable");
                                global_metrics().connection_error();
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                        global_metrics().connection_error();
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            }
        }
    }
}
