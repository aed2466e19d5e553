//! Store operations served by the peer daemon.
//!
//! Payloads never travel in the request or the response. `set` pulls the
//! object out of the caller's registered buffer, `get` and `exists` push into
//! it. Every local registration is released before the handler returns,
//! whichever way it returns.
//!
//! A declared size that disagrees with the stored object or the caller's
//! buffer is honoured up to the shortest of the three: a `set` larger than
//! the caller's buffer keeps a zero-filled tail, a `get` shorter than the
//! stored object is truncated.

use bytes::Bytes;
use futures::future::BoxFuture;
use std::result::Result as StdResult;
use tracing::{debug, warn};

use crate::bulk::{zeroed_buffer, AccessMode};
use crate::error::DimError;
use crate::protocol::dispatcher::{Dispatcher, RpcContext};
use crate::protocol::message::Operation;
use crate::protocol::status::{FaultCode, RpcStatus};

type Outcome = StdResult<RpcStatus, FaultCode>;

/// Dispatcher with all four store operations registered.
pub fn dispatcher() -> crate::error::Result<Dispatcher> {
    let dispatcher = Dispatcher::new();
    dispatcher.register(Operation::Set, set)?;
    dispatcher.register(Operation::Get, get)?;
    dispatcher.register(Operation::Exists, exists)?;
    dispatcher.register(Operation::Evict, evict)?;
    Ok(dispatcher)
}

pub fn set(ctx: RpcContext<'_>) -> BoxFuture<'_, RpcStatus> {
    Box::pin(async move { settle(Operation::Set, store_object(ctx).await) })
}

pub fn get(ctx: RpcContext<'_>) -> BoxFuture<'_, RpcStatus> {
    Box::pin(async move { settle(Operation::Get, load_object(ctx).await) })
}

pub fn exists(ctx: RpcContext<'_>) -> BoxFuture<'_, RpcStatus> {
    Box::pin(async move { settle(Operation::Exists, probe_object(ctx).await) })
}

pub fn evict(ctx: RpcContext<'_>) -> BoxFuture<'_, RpcStatus> {
    Box::pin(async move { settle(Operation::Evict, remove_object(ctx)) })
}

fn settle(operation: Operation, outcome: Outcome) -> RpcStatus {
    match outcome {
        Ok(status) => status,
        Err(code) => {
            debug!(op = %operation, fault = %code, "operation failed");
            RpcStatus::TransferFault(code)
        }
    }
}

/// Fault code for a failed bulk step, `fallback` when the cause is opaque.
fn transfer_fault(error: &DimError, fallback: FaultCode) -> FaultCode {
    match error.fault_code() {
        FaultCode::ConnectionLost => fallback,
        code => code,
    }
}

fn internal(error: DimError) -> FaultCode {
    warn!(error = %error, "store unavailable");
    FaultCode::Internal
}

async fn store_object(ctx: RpcContext<'_>) -> Outcome {
    let RpcContext {
        store,
        transfer,
        request,
        max_object_size,
    } = ctx;
    let remote = request.bulk.ok_or(FaultCode::MissingDescriptor)?;

    let buffer = zeroed_buffer(request.size, max_object_size).map_err(|e| {
        warn!(key = %request.key_id, error = %e, "cannot allocate object");
        FaultCode::AllocationFailed
    })?;
    let local = transfer.register(buffer, AccessMode::WriteOnly);

    let length = request.size.min(remote.size);
    let pulled = transfer.pull(&remote, 0, &local, 0, length).await;
    let buffer = transfer.release(&local);
    pulled.map_err(|e| transfer_fault(&e, FaultCode::PullFailed))?;

    let buffer = buffer.ok_or(FaultCode::Internal)?;
    store
        .insert(request.key_id.clone(), Bytes::from(buffer))
        .map_err(internal)?;
    Ok(RpcStatus::Ok)
}

async fn load_object(ctx: RpcContext<'_>) -> Outcome {
    let RpcContext {
        store,
        transfer,
        request,
        ..
    } = ctx;
    let Some(stored) = store.get(&request.key_id).map_err(internal)? else {
        return Ok(RpcStatus::NotFound);
    };
    let remote = request.bulk.ok_or(FaultCode::MissingDescriptor)?;

    let length = (stored.len() as u64).min(request.size).min(remote.size);
    let local = transfer.register(stored[..length as usize].to_vec(), AccessMode::ReadOnly);

    let pushed = transfer.push(&remote, 0, &local, 0, length).await;
    transfer.release(&local);
    pushed.map_err(|e| transfer_fault(&e, FaultCode::PushFailed))?;
    Ok(RpcStatus::Ok)
}

async fn probe_object(ctx: RpcContext<'_>) -> Outcome {
    let RpcContext {
        store,
        transfer,
        request,
        ..
    } = ctx;
    let remote = request.bulk.ok_or(FaultCode::MissingDescriptor)?;

    let present = store.contains(&request.key_id).map_err(internal)?;
    let digit = if present { b'1' } else { b'0' };
    let local = transfer.register(vec![digit], AccessMode::ReadOnly);

    let pushed = transfer.push(&remote, 0, &local, 0, 1).await;
    transfer.release(&local);
    pushed.map_err(|e| transfer_fault(&e, FaultCode::PushFailed))?;
    Ok(RpcStatus::Ok)
}

fn remove_object(ctx: RpcContext<'_>) -> Outcome {
    match ctx.store.remove(&ctx.request.key_id).map_err(internal)? {
        Some(_) => Ok(RpcStatus::Ok),
        None => Ok(RpcStatus::NotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::{BulkDescriptor, BulkRegistry, BulkTransfer};
    use crate::daemon::store::PeerStore;
    use crate::error::Result;
    use crate::protocol::message::RpcRequest;
    use futures::future;

    /// Loopback transfer: "remote" descriptors live in a second registry.
    #[derive(Default)]
    struct Loopback {
        local: BulkRegistry,
        remote: BulkRegistry,
    }

    impl Loopback {
        fn copy(
            &mut self,
            from_remote: bool,
            remote: &BulkDescriptor,
            remote_offset: u64,
            local: &BulkDescriptor,
            local_offset: u64,
            length: u64,
        ) -> Result<()> {
            if from_remote {
                let bytes = self.remote.get(remote.id)?.read(remote_offset, length)?.to_vec();
                self.local.get_mut(local.id)?.write(local_offset, &bytes)
            } else {
                let bytes = self.local.get(local.id)?.read(local_offset, length)?.to_vec();
                self.remote.get_mut(remote.id)?.write(remote_offset, &bytes)
            }
        }
    }

    impl BulkTransfer for Loopback {
        fn register(&mut self, data: Vec<u8>, mode: AccessMode) -> BulkDescriptor {
            self.local.register(data, mode)
        }

        fn release(&mut self, descriptor: &BulkDescriptor) -> Option<Vec<u8>> {
            self.local.release(descriptor.id)
        }

        fn pull<'a>(
            &'a mut self,
            remote: &'a BulkDescriptor,
            remote_offset: u64,
            local: &'a BulkDescriptor,
            local_offset: u64,
            length: u64,
        ) -> BoxFuture<'a, Result<()>> {
            let result = self.copy(true, remote, remote_offset, local, local_offset, length);
            Box::pin(future::ready(result))
        }

        fn push<'a>(
            &'a mut self,
            remote: &'a BulkDescriptor,
            remote_offset: u64,
            local: &'a BulkDescriptor,
            local_offset: u64,
            length: u64,
        ) -> BoxFuture<'a, Result<()>> {
            let result = self.copy(false, remote, remote_offset, local, local_offset, length);
            Box::pin(future::ready(result))
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        store: PeerStore,
        transfer: Loopback,
    }

    impl Harness {
        #[allow(clippy::unwrap_used)]
        fn new() -> Self {
            Self {
                dispatcher: dispatcher().unwrap(),
                store: PeerStore::new(),
                transfer: Loopback::default(),
            }
        }

        async fn call(
            &mut self,
            operation: Operation,
            key: &str,
            size: u64,
            bulk: Option<BulkDescriptor>,
        ) -> RpcStatus {
            let request = RpcRequest {
                operation,
                bulk,
                size,
                key_id: key.to_string(),
            };
            self.dispatcher
                .dispatch(RpcContext {
                    store: &self.store,
                    transfer: &mut self.transfer,
                    request: &request,
                    max_object_size: 1024,
                })
                .await
        }

        async fn set(&mut self, key: &str, size: u64, data: &[u8]) -> RpcStatus {
            let desc = self.transfer.remote.register(data.to_vec(), AccessMode::ReadOnly);
            let status = self.call(Operation::Set, key, size, Some(desc)).await;
            self.transfer.remote.release(desc.id);
            status
        }

        async fn get(&mut self, key: &str, size: u64) -> (RpcStatus, Vec<u8>) {
            let desc = self.transfer.remote.register(vec![0; size as usize], AccessMode::WriteOnly);
            let status = self.call(Operation::Get, key, size, Some(desc)).await;
            (status, self.transfer.remote.release(desc.id).unwrap_or_default())
        }

        async fn exists(&mut self, key: &str) -> (RpcStatus, Vec<u8>) {
            let desc = self.transfer.remote.register(vec![0], AccessMode::WriteOnly);
            let status = self.call(Operation::Exists, key, 1, Some(desc)).await;
            (status, self.transfer.remote.release(desc.id).unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_set_get_exists_evict_cycle() {
        let mut h = Harness::new();

        assert_eq!(h.set("k", 5, b"world").await, RpcStatus::Ok);
        assert_eq!(h.exists("k").await, (RpcStatus::Ok, b"1".to_vec()));
        assert_eq!(h.get("k", 5).await, (RpcStatus::Ok, b"world".to_vec()));

        assert_eq!(h.call(Operation::Evict, "k", 0, None).await, RpcStatus::Ok);
        assert_eq!(h.call(Operation::Evict, "k", 0, None).await, RpcStatus::NotFound);
        assert_eq!(h.exists("k").await, (RpcStatus::Ok, b"0".to_vec()));
        assert_eq!(h.get("k", 5).await.0, RpcStatus::NotFound);
        assert!(h.transfer.local.is_empty());
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_declared_size_mismatch() {
        let mut h = Harness::new();

        // declared size larger than the buffer: zero tail
        assert_eq!(h.set("long", 6, b"abc").await, RpcStatus::Ok);
        assert_eq!(&h.store.get("long").unwrap().unwrap()[..], b"abc\0\0\0");

        // declared size smaller than the stored object: truncated read
        assert_eq!(h.set("short", 5, b"hello").await, RpcStatus::Ok);
        assert_eq!(h.get("short", 2).await, (RpcStatus::Ok, b"he".to_vec()));

        // larger read than stored: the rest of the caller's buffer stays zero
        assert_eq!(h.get("short", 7).await, (RpcStatus::Ok, b"hello\0\0".to_vec()));
    }

    #[tokio::test]
    async fn test_faults_are_reported_and_registrations_released() {
        let mut h = Harness::new();

        assert_eq!(
            h.call(Operation::Set, "k", 4, None).await,
            RpcStatus::TransferFault(FaultCode::MissingDescriptor)
        );
        assert_eq!(
            h.set("big", 4096, b"x").await,
            RpcStatus::TransferFault(FaultCode::AllocationFailed)
        );

        let write_only = h.transfer.remote.register(vec![1, 2], AccessMode::WriteOnly);
        assert_eq!(
            h.call(Operation::Set, "k", 2, Some(write_only)).await,
            RpcStatus::TransferFault(FaultCode::AccessDenied)
        );

        let gone = BulkDescriptor {
            id: 999,
            size: 1,
            mode: AccessMode::ReadWrite,
        };
        assert_eq!(
            h.call(Operation::Exists, "k", 1, Some(gone)).await,
            RpcStatus::TransferFault(FaultCode::UnknownDescriptor)
        );
        assert!(h.transfer.local.is_empty());
    }
}
