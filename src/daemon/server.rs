use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::DimConfig;
use crate::daemon::handle::PeerHandle;
use crate::daemon::handlers;
use crate::daemon::store::PeerStore;
use crate::error::{DimError, Result};
use crate::protocol::dispatcher::{Dispatcher, RpcContext};
use crate::protocol::message::Message;
use crate::protocol::status::{FaultCode, RpcStatus};
use crate::transport::address::PeerUrl;
use crate::transport::channel::Channel;

/// Poll interval while waiting for connections to drain
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Lifecycle of a daemon's listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Listening,
    Finalizing,
    Stopped,
}

/// State shared by every connection task.
struct Shared {
    store: PeerStore,
    dispatcher: Dispatcher,
    chunk_size: usize,
    chunk_timeout: Duration,
    max_object_size: u64,
}

/// A bound, not yet running, peer daemon.
pub struct PeerDaemon {
    listener: TcpListener,
    url: PeerUrl,
    shared: Arc<Shared>,
    max_connections: usize,
    shutdown_timeout: Duration,
    state: watch::Sender<ServerState>,
}

impl PeerDaemon {
    /// Bind the listener for `url`.
    ///
    /// Port 0 binds an ephemeral port; [`PeerDaemon::url`] reports the real one.
    pub async fn bind(url: &PeerUrl, config: &DimConfig) -> Result<Self> {
        if !url.protocol.is_stream_based() {
            return Err(DimError::UnsupportedProtocol(format!(
                "{} has no bulk transport backend in this build",
                url.protocol
            )));
        }

        let listener = TcpListener::bind((url.host.as_str(), url.port)).await?;
        let url = url.with_port(listener.local_addr()?.port());
        let (state, _) = watch::channel(ServerState::Starting);

        let dispatcher = handlers::dispatcher()?;
        debug!(%url, operations = ?dispatcher.operations()?, "daemon bound");
        Ok(Self {
            listener,
            url,
            shared: Arc::new(Shared {
                store: PeerStore::new(),
                dispatcher,
                chunk_size: config.transport.bulk_chunk_size,
                chunk_timeout: config.transport.bulk_timeout,
                max_object_size: config.transport.max_object_size,
            }),
            max_connections: config.daemon.max_connections,
            shutdown_timeout: config.daemon.shutdown_timeout,
            state,
        })
    }

    pub fn url(&self) -> &PeerUrl {
        &self.url
    }

    /// Handle to the objects this daemon owns.
    pub fn store(&self) -> PeerStore {
        self.shared.store.clone()
    }

    pub fn state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Serve until `shutdown_rx` fires (or its sender is dropped) or a peer
    /// sends a shutdown request, then finalize.
    #[instrument(skip_all, fields(url = %self.url))]
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let PeerDaemon {
            listener,
            url: _,
            shared,
            max_connections,
            shutdown_timeout,
            state,
        } = self;

        let (remote_tx, mut remote_rx) = mpsc::channel::<()>(1);
        let (stop_tx, stop_rx) = watch::channel(false);
        let active = Arc::new(AtomicUsize::new(0));

        state.send_replace(ServerState::Listening);
        info!("daemon listening");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("shutdown requested");
                    break;
                }
                _ = remote_rx.recv() => {
                    info!("shutdown requested by peer");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            if active.load(Ordering::SeqCst) >= max_connections {
                                warn!(%peer, max_connections, "connection limit reached, refusing peer");
                                continue;
                            }
                            if let Err(e) = stream.set_nodelay(true) {
                                debug!(error = %e, "failed to set TCP_NODELAY");
                            }

                            let guard = ConnectionGuard::new(active.clone());
                            let shared = shared.clone();
                            let stop = stop_rx.clone();
                            let remote_tx = remote_tx.clone();
                            tokio::spawn(async move {
                                let _guard = guard;
                                debug!(%peer, "connection opened");
                                serve_connection(stream, shared, stop, remote_tx).await;
                                debug!(%peer, "connection closed");
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }
            }
        }

        drop(listener);
        state.send_replace(ServerState::Finalizing);
        let _ = stop_tx.send(true);

        let deadline = tokio::time::sleep(shutdown_timeout);
        tokio::pin!(deadline);
        while active.load(Ordering::SeqCst) > 0 {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(
                        connections = active.load(Ordering::SeqCst),
                        "shutdown timeout reached, abandoning connections"
                    );
                    break;
                }
                _ = tokio::time::sleep(DRAIN_POLL) => {}
            }
        }

        // finalize hook
        let objects = shared.store.len().unwrap_or(0);
        info!(pid = std::process::id(), objects, "daemon finalized");
        state.send_replace(ServerState::Stopped);
        Ok(())
    }

    /// Run on the current runtime, returning a handle to stop it.
    pub fn spawn(self) -> DaemonHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let url = self.url.clone();
        let store = self.store();
        let state = self.state();
        let task = tokio::spawn(self.run(shutdown_rx));
        DaemonHandle {
            url,
            store,
            state,
            shutdown_tx,
            task,
        }
    }
}

/// Keeps the active connection count honest however a task ends.
struct ConnectionGuard(Arc<AtomicUsize>);

impl ConnectionGuard {
    fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn serve_connection(
    stream: TcpStream,
    shared: Arc<Shared>,
    mut stop: watch::Receiver<bool>,
    remote_shutdown: mpsc::Sender<()>,
) {
    let mut handle = PeerHandle::new(Channel::new(stream), shared.chunk_size, shared.chunk_timeout);

    loop {
        // only idle connections are interrupted; a request in flight completes
        let received = tokio::select! {
            _ = stop.changed() => break,
            received = handle.channel().recv() => received,
        };

        let reply = match received {
            Ok(Message::Request(request)) => {
                let status = shared
                    .dispatcher
                    .dispatch(RpcContext {
                        store: &shared.store,
                        transfer: &mut handle,
                        request: &request,
                        max_object_size: shared.max_object_size,
                    })
                    .await;
                debug!(op = %request.operation, key = %request.key_id, %status, "served");
                Message::Response {
                    operation: request.operation,
                    key_id: request.key_id,
                    status,
                }
            }
            Ok(Message::Shutdown) => {
                let _ = remote_shutdown.try_send(());
                Message::ShutdownAck
            }
            Ok(other) => {
                warn!(kind = other.kind(), "unexpected message outside a transfer");
                Message::Fault(FaultCode::MalformedRequest)
            }
            Err(DimError::Serialization(e)) => {
                warn!(error = %e, "undecodable request");
                Message::Fault(FaultCode::MalformedRequest)
            }
            Err(DimError::ConnectionClosed) => break,
            Err(e) => {
                debug!(error = %e, "connection failed");
                break;
            }
        };

        if handle.outstanding() > 0 {
            warn!(regions = handle.outstanding(), "handler left bulk regions registered");
        }
        let stalled = matches!(
            reply,
            Message::Response {
                status: RpcStatus::TransferFault(FaultCode::Timeout),
                ..
            }
        );
        if let Err(e) = handle.channel().send(&reply).await {
            debug!(error = %e, "failed to send reply");
            break;
        }
        // late bulk frames would be read as requests
        if stalled {
            debug!("closing connection after a stalled transfer");
            break;
        }
    }
}

/// Handle to a daemon running inside this process.
pub struct DaemonHandle {
    url: PeerUrl,
    store: PeerStore,
    state: watch::Receiver<ServerState>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl DaemonHandle {
    pub fn url(&self) -> &PeerUrl {
        &self.url
    }

    pub fn store(&self) -> &PeerStore {
        &self.store
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Wait until the daemon has finalized, whoever asked it to.
    pub async fn stopped(&mut self) {
        let _ = self
            .state
            .wait_for(|state| *state == ServerState::Stopped)
            .await;
    }

    /// Stop the daemon and wait for it to finalize.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(()).await;
        self.task
            .await
            .map_err(|e| DimError::Io(std::io::Error::other(e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::address::Protocol;

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_ephemeral_port_is_reported() {
        let url = PeerUrl::new(Protocol::Tcp, "127.0.0.1", 0);
        let daemon = PeerDaemon::bind(&url, &DimConfig::default()).await.unwrap();
        assert_ne!(daemon.url().port, 0);
        assert_eq!(*daemon.state().borrow(), ServerState::Starting);
    }

    #[tokio::test]
    async fn test_rejects_protocol_without_stream_backend() {
        let url = PeerUrl::new(Protocol::Verbs, "127.0.0.1", 0);
        assert!(matches!(
            PeerDaemon::bind(&url, &DimConfig::default()).await,
            Err(DimError::UnsupportedProtocol(_))
        ));
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_shutdown_finalizes() {
        let url = PeerUrl::new(Protocol::Tcp, "127.0.0.1", 0);
        let handle = PeerDaemon::bind(&url, &DimConfig::default())
            .await
            .unwrap()
            .spawn();
        let mut state = handle.state.clone();
        state
            .wait_for(|s| *s == ServerState::Listening)
            .await
            .unwrap();

        handle.shutdown().await.unwrap();
        assert_eq!(*state.borrow(), ServerState::Stopped);
    }
}
