use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};

use crate::bulk::{AccessMode, BulkDescriptor, BulkRegistry};
use crate::error::{constants, DimError, Result};
use crate::protocol::message::{Message, Operation, RpcRequest};
use crate::protocol::status::RpcStatus;
use crate::transport::address::PeerUrl;
use crate::transport::channel::Channel;
use crate::utils::timeout::with_timeout_error;

/// Client-side RPC engine.
///
/// Owns one cached connection per peer and the bulk registrations that
/// daemons pull from and push into while a call is in flight. Calls are
/// strictly sequential per engine; callers serialize access to it.
pub struct Engine {
    connections: HashMap<PeerUrl, Channel<TcpStream>>,
    registry: BulkRegistry,
    rpcs: HashSet<Operation>,
    call_timeout: Duration,
    finalized: bool,
}

impl Engine {
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            connections: HashMap::new(),
            registry: BulkRegistry::new(),
            rpcs: HashSet::new(),
            call_timeout,
            finalized: false,
        }
    }

    /// Declare an operation this engine may call.
    pub fn register_rpc(&mut self, operation: Operation) {
        self.rpcs.insert(operation);
    }

    pub fn is_registered(&self, operation: Operation) -> bool {
        self.rpcs.contains(&operation)
    }

    /// Expose `data` to peers under `mode`.
    pub fn register(&mut self, data: Vec<u8>, mode: AccessMode) -> BulkDescriptor {
        self.registry.register(data, mode)
    }

    pub fn release(&mut self, descriptor: &BulkDescriptor) -> Option<Vec<u8>> {
        self.registry.release(descriptor.id)
    }

    /// Resolve a peer URL to an open connection, dialing it on first use.
    pub async fn lookup(&mut self, url: &PeerUrl) -> Result<()> {
        if self.finalized {
            return Err(DimError::Closed(constants::ERR_ENGINE_FINALIZED));
        }
        if !self.connections.contains_key(url) {
            let stream = TcpStream::connect((url.host.as_str(), url.port)).await?;
            stream.set_nodelay(true)?;
            debug!(peer = %url, "connected to peer");
            self.connections.insert(url.clone(), Channel::new(stream));
        }
        Ok(())
    }

    /// Invoke `operation` on the daemon at `url`.
    ///
    /// Bulk frames the daemon sends while the call is outstanding are served
    /// from this engine's registrations. Any transport failure drops the
    /// cached connection so the next call dials afresh.
    #[instrument(skip(self, url, bulk), fields(peer = %url, op = %operation))]
    pub async fn call(
        &mut self,
        url: &PeerUrl,
        operation: Operation,
        key_id: &str,
        size: u64,
        bulk: Option<BulkDescriptor>,
    ) -> Result<RpcStatus> {
        if !self.is_registered(operation) {
            return Err(DimError::UnregisteredRpc(operation.name()));
        }

        let request = RpcRequest {
            operation,
            bulk,
            size,
            key_id: key_id.to_string(),
        };
        let timeout = self.call_timeout;
        let result = with_timeout_error(self.exchange(url, request), timeout).await;

        if let Err(ref e) = result {
            debug!(error = %e, "dropping connection after failed call");
            self.connections.remove(url);
        }
        result
    }

    async fn exchange(&mut self, url: &PeerUrl, request: RpcRequest) -> Result<RpcStatus> {
        self.lookup(url).await?;

        let operation = request.operation;
        let key_id = request.key_id.clone();
        let Self {
            connections,
            registry,
            ..
        } = self;
        let channel = connections
            .get_mut(url)
            .ok_or(DimError::ConnectionClosed)?;

        channel.send(&Message::Request(request)).await?;

        loop {
            match channel.recv().await? {
                Message::Response {
                    operation: answered,
                    key_id: answered_key,
                    status,
                } => {
                    if answered != operation || answered_key != key_id {
                        return Err(DimError::UnexpectedMessage);
                    }
                    return Ok(status);
                }
                Message::BulkPull {
                    descriptor,
                    offset,
                    length,
                } => {
                    let reply = match registry
                        .get(descriptor)
                        .and_then(|region| region.read(offset, length))
                    {
                        Ok(bytes) => Message::BulkData(bytes.to_vec()),
                        Err(e) => {
                            debug!(error = %e, "refusing bulk pull");
                            Message::Fault(e.fault_code())
                        }
                    };
                    channel.send(&reply).await?;
                }
                Message::BulkPush {
                    descriptor,
                    offset,
                    data,
                } => {
                    let reply = match registry
                        .get_mut(descriptor)
                        .and_then(|region| region.write(offset, &data))
                    {
                        Ok(()) => Message::BulkAck,
                        Err(e) => {
                            debug!(error = %e, "refusing bulk push");
                            Message::Fault(e.fault_code())
                        }
                    };
                    channel.send(&reply).await?;
                }
                Message::Fault(code) => return Err(DimError::RemoteFault(code)),
                other => {
                    warn!(kind = other.kind(), "unexpected message during call");
                    return Err(DimError::UnexpectedMessage);
                }
            }
        }
    }

    /// Ask the daemon at `url` to finalize and wait for its acknowledgement.
    pub async fn shutdown_remote(&mut self, url: &PeerUrl) -> Result<()> {
        let timeout = self.call_timeout;
        let result = with_timeout_error(self.shutdown_exchange(url), timeout).await;
        self.connections.remove(url);
        result
    }

    async fn shutdown_exchange(&mut self, url: &PeerUrl) -> Result<()> {
        self.lookup(url).await?;
        let channel = self
            .connections
            .get_mut(url)
            .ok_or(DimError::ConnectionClosed)?;
        channel.send(&Message::Shutdown).await?;
        match channel.recv().await? {
            Message::ShutdownAck => Ok(()),
            _ => Err(DimError::UnexpectedMessage),
        }
    }

    /// Close every connection; later calls fail with [`DimError::Closed`].
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        if !self.registry.is_empty() {
            warn!(
                regions = self.registry.len(),
                "finalizing engine with live bulk registrations"
            );
        }
        let peers = self.connections.len();
        self.connections.clear();
        info!(peers, "engine finalized");
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn registered_regions(&self) -> usize {
        self.registry.len()
    }
}
