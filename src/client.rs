//! # Transport Client
//!
//! The process-facing side of the store. A [`DimClient`] resolves the address
//! of its node, attaches to the daemon already listening there or spawns
//! one, and then moves objects in and out of daemons through bulk buffers.
//!
//! Every operation on a key goes to the key's owner, which is the client's
//! own daemon for keys it minted itself.
//!
//! ```rust,no_run
//! use dim_transport::{DimClient, DimConfig};
//!
//! # async fn demo() -> dim_transport::Result<()> {
//! let client = DimClient::connect(DimConfig::default()).await?;
//! let key = client.put(b"world").await?;
//! assert!(client.exists(&key).await?);
//! assert_eq!(client.get_bytes(&key).await?, b"world");
//! client.evict(&key).await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::bulk::{zeroed_buffer, AccessMode};
use crate::config::DimConfig;
use crate::daemon::process::{wait_for_server, DaemonProcess, DaemonState};
use crate::error::{constants, DimError, Result};
use crate::key::StoreKey;
use crate::protocol::message::Operation;
use crate::protocol::status::{FaultCode, RpcStatus};
use crate::transport::address::{resolve_host, PeerUrl};
use crate::transport::engine::Engine;

/// Client of the peer daemons.
///
/// Calls are serialized per client; share one across tasks behind an `Arc`.
pub struct DimClient {
    config: DimConfig,
    url: PeerUrl,
    engine: Mutex<Engine>,
    daemon: Mutex<DaemonProcess>,
    closed: AtomicBool,
}

impl DimClient {
    /// Resolve the local address, attach to or spawn the local daemon and
    /// register the store operations.
    #[instrument(skip_all)]
    pub async fn connect(mut config: DimConfig) -> Result<Self> {
        config.validate_strict()?;

        let client = &config.client;
        let host = resolve_host(client.address.as_deref(), client.interface.as_deref())?;
        let requested = PeerUrl::new(client.protocol, host, client.port);

        let daemon = attach_or_spawn(&config, &requested).await?;
        let url = daemon.url().clone();
        config.client.address = Some(url.host.clone());
        config.client.port = url.port;

        let mut engine = Engine::new(config.client.call_timeout);
        for operation in Operation::ALL {
            engine.register_rpc(operation);
        }

        info!(%url, "client connected");
        Ok(Self {
            config,
            url,
            engine: Mutex::new(engine),
            daemon: Mutex::new(daemon),
            closed: AtomicBool::new(false),
        })
    }

    /// Effective configuration: the host and port are the ones the local
    /// daemon actually listens on, so a client built from it attaches there.
    pub fn config(&self) -> &DimConfig {
        &self.config
    }

    /// Address of the local daemon; stamped into every key this client mints.
    pub fn url(&self) -> &PeerUrl {
        &self.url
    }

    pub async fn daemon_state(&self) -> DaemonState {
        self.daemon.lock().await.state()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DimError::Closed(constants::ERR_CLIENT_CLOSED));
        }
        Ok(())
    }

    /// Key for `payload`, owned by the local daemon.
    pub fn create_key(&self, payload: &[u8]) -> Result<StoreKey> {
        StoreKey::mint(payload.len() as u64, self.url.clone())
    }

    /// Register `buffer`, run `operation` against the key's owner, release.
    async fn call_with_buffer(
        &self,
        key: &StoreKey,
        operation: Operation,
        buffer: Vec<u8>,
        size: u64,
    ) -> Result<(RpcStatus, Vec<u8>)> {
        self.ensure_open()?;
        let mut engine = self.engine.lock().await;

        let descriptor = engine.register(buffer, AccessMode::ReadWrite);
        let result = engine
            .call(key.owner(), operation, key.key_id(), size, Some(descriptor))
            .await;
        let buffer = engine.release(&descriptor).unwrap_or_default();

        Ok((result?, buffer))
    }

    /// Store `data` under `key` on the key's owner.
    #[instrument(skip(self, data), fields(key = %key.key_id()))]
    pub async fn set_bytes(&self, key: &StoreKey, data: &[u8]) -> Result<()> {
        let (status, _) = self
            .call_with_buffer(key, Operation::Set, data.to_vec(), key.object_size())
            .await?;
        match status {
            RpcStatus::Ok => Ok(()),
            RpcStatus::NotFound => Err(transfer_error(key, FaultCode::Internal)),
            RpcStatus::TransferFault(code) => Err(transfer_error(key, code)),
        }
    }

    /// Fetch the object, sized by the key's recorded `object_size`.
    ///
    /// A stored object shorter than that leaves a zero-filled tail; a longer
    /// one is truncated.
    #[instrument(skip(self), fields(key = %key.key_id()))]
    pub async fn get_bytes(&self, key: &StoreKey) -> Result<Vec<u8>> {
        let buffer = zeroed_buffer(key.object_size(), self.config.transport.max_object_size)?;
        let (status, buffer) = self
            .call_with_buffer(key, Operation::Get, buffer, key.object_size())
            .await?;
        match status {
            RpcStatus::Ok => Ok(buffer),
            RpcStatus::NotFound => Err(DimError::NotFound(key.key_id().to_string())),
            RpcStatus::TransferFault(code) => Err(transfer_error(key, code)),
        }
    }

    /// Whether the owner holds the key.
    ///
    /// A probe that fails is an error, never `false`.
    #[instrument(skip(self), fields(key = %key.key_id()))]
    pub async fn exists(&self, key: &StoreKey) -> Result<bool> {
        let probe_error = |reason: String| DimError::Probe {
            key: key.key_id().to_string(),
            reason,
        };

        match self.call_with_buffer(key, Operation::Exists, vec![0], 1).await {
            Ok((RpcStatus::Ok, answer)) => match answer.first() {
                Some(b'1') => Ok(true),
                Some(b'0') => Ok(false),
                other => Err(probe_error(format!("unexpected answer {other:?}"))),
            },
            Ok((status, _)) => Err(probe_error(status.to_string())),
            Err(e @ DimError::Closed(_)) => Err(e),
            Err(e) => Err(probe_error(e.to_string())),
        }
    }

    /// Remove the key from its owner; [`DimError::NotFound`] if it was absent.
    #[instrument(skip(self), fields(key = %key.key_id()))]
    pub async fn evict(&self, key: &StoreKey) -> Result<()> {
        self.ensure_open()?;
        let status = self
            .engine
            .lock()
            .await
            .call(key.owner(), Operation::Evict, key.key_id(), 0, None)
            .await?;
        match status {
            RpcStatus::Ok => Ok(()),
            RpcStatus::NotFound => Err(DimError::NotFound(key.key_id().to_string())),
            RpcStatus::TransferFault(code) => Err(transfer_error(key, code)),
        }
    }

    /// Mint a key for `data` and store it.
    pub async fn put(&self, data: &[u8]) -> Result<StoreKey> {
        let key = self.create_key(data)?;
        self.set_bytes(&key, data).await?;
        Ok(key)
    }

    /// Store several objects, returning their keys in order.
    pub async fn put_batch<T: AsRef<[u8]>>(&self, objects: &[T]) -> Result<Vec<StoreKey>> {
        let mut keys = Vec::with_capacity(objects.len());
        for object in objects {
            keys.push(self.put(object.as_ref()).await?);
        }
        Ok(keys)
    }

    /// Fetch several objects; a key missing on its owner yields `None`.
    pub async fn get_batch(&self, keys: &[StoreKey]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut objects = Vec::with_capacity(keys.len());
        for key in keys {
            objects.push(match self.get_bytes(key).await {
                Ok(bytes) => Some(bytes),
                Err(DimError::NotFound(_)) => None,
                Err(e) => return Err(e),
            });
        }
        Ok(objects)
    }

    /// Close the client and stop the daemon it spawned.
    pub async fn close(&self) -> Result<()> {
        self.close_with(true).await
    }

    /// Close the client. With `kill_server`, a daemon this client spawned is
    /// asked to finalize and then stopped; otherwise it is left running.
    /// A daemon the client merely attached to is never stopped.
    ///
    /// Closing twice is a no-op.
    pub async fn close_with(&self, kill_server: bool) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("client already closed");
            return Ok(());
        }

        let mut engine = self.engine.lock().await;
        let mut daemon = self.daemon.lock().await;

        if kill_server && daemon.owns_process() {
            let pid = daemon.pid();
            if let Err(e) = engine.shutdown_remote(&self.url).await {
                warn!(error = %e, "daemon did not acknowledge shutdown");
            }
            engine.finalize();
            daemon.terminate(self.config.daemon.kill_timeout).await;
            info!(?pid, "terminated local daemon on close");
        } else {
            engine.finalize();
            daemon.detach();
        }

        info!(url = %self.url, "client closed");
        Ok(())
    }
}

fn transfer_error(key: &StoreKey, code: FaultCode) -> DimError {
    DimError::Transfer {
        key: key.key_id().to_string(),
        code,
    }
}

async fn attach_or_spawn(config: &DimConfig, url: &PeerUrl) -> Result<DaemonProcess> {
    if !config.client.force_spawn_server && url.port != 0 {
        debug!(%url, "looking for a running daemon");
        match wait_for_server(url, config.daemon.attach_timeout).await {
            Ok(()) => {
                info!(%url, "attached to running daemon");
                return Ok(DaemonProcess::attached(url.clone()));
            }
            Err(e) => debug!(%url, error = %e, "no daemon answered"),
        }
    }

    let daemon = DaemonProcess::spawn(config, url).await?;
    info!(url = %daemon.url(), pid = ?daemon.pid(), "spawned local daemon");
    Ok(daemon)
}

/// Byte-level store contract consumed by caching layers.
///
/// Unlike the inherent methods, a missing object is `None` from `get_bytes`
/// and evicting one is not an error.
pub trait ByteTransport: Send + Sync {
    fn create_key(&self, payload: &[u8]) -> Result<StoreKey>;

    fn set_bytes<'a>(&'a self, key: &'a StoreKey, data: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    fn get_bytes<'a>(&'a self, key: &'a StoreKey) -> BoxFuture<'a, Result<Option<Vec<u8>>>>;

    fn exists<'a>(&'a self, key: &'a StoreKey) -> BoxFuture<'a, Result<bool>>;

    fn evict<'a>(&'a self, key: &'a StoreKey) -> BoxFuture<'a, Result<()>>;

    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

impl ByteTransport for DimClient {
    fn create_key(&self, payload: &[u8]) -> Result<StoreKey> {
        DimClient::create_key(self, payload)
    }

    fn set_bytes<'a>(&'a self, key: &'a StoreKey, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(DimClient::set_bytes(self, key, data))
    }

    fn get_bytes<'a>(&'a self, key: &'a StoreKey) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
        Box::pin(async move {
            match DimClient::get_bytes(self, key).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(DimError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    fn exists<'a>(&'a self, key: &'a StoreKey) -> BoxFuture<'a, Result<bool>> {
        Box::pin(DimClient::exists(self, key))
    }

    fn evict<'a>(&'a self, key: &'a StoreKey) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match DimClient::evict(self, key).await {
                Err(DimError::NotFound(_)) => Ok(()),
                other => other,
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(DimClient::close(self))
    }
}
