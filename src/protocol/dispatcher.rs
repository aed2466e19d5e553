use crate::bulk::BulkTransfer;
use crate::daemon::store::PeerStore;
use crate::error::{constants, DimError, Result};
use crate::protocol::message::{Operation, RpcRequest};
use crate::protocol::status::{FaultCode, RpcStatus};
use futures::future::{self, BoxFuture};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Everything a handler may touch while serving one request.
pub struct RpcContext<'a> {
    pub store: &'a PeerStore,
    /// Bulk access to the caller's registered regions
    pub transfer: &'a mut dyn BulkTransfer,
    pub request: &'a RpcRequest,
    /// Largest buffer a handler may allocate on the caller's behalf
    pub max_object_size: u64,
}

type HandlerFn = dyn for<'a> Fn(RpcContext<'a>) -> BoxFuture<'a, RpcStatus> + Send + Sync + 'static;

/// Operation dispatch table.
/// Keys are the operation names so a table can be inspected without the enum.
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<Cow<'static, str>, Arc<HandlerFn>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register<F>(&self, operation: Operation, handler: F) -> Result<()>
    where
        F: for<'a> Fn(RpcContext<'a>) -> BoxFuture<'a, RpcStatus> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| DimError::LockPoisoned(constants::ERR_DISPATCHER_WRITE_LOCK))?;

        handlers.insert(Cow::Borrowed(operation.name()), Arc::new(handler));
        Ok(())
    }

    /// Names of the registered operations, sorted.
    pub fn operations(&self) -> Result<Vec<String>> {
        let handlers = self
            .handlers
            .read()
            .map_err(|_| DimError::LockPoisoned(constants::ERR_DISPATCHER_READ_LOCK))?;
        let mut names: Vec<String> = handlers.keys().map(|k| k.to_string()).collect();
        names.sort();
        Ok(names)
    }

    /// Route a request to its handler.
    ///
    /// Never fails: an unroutable request becomes a transfer fault.
    pub fn dispatch<'a>(&self, ctx: RpcContext<'a>) -> BoxFuture<'a, RpcStatus> {
        let handler = match self.handlers.read() {
            Ok(handlers) => handlers.get(ctx.request.operation.name()).cloned(),
            Err(_) => {
                return Box::pin(future::ready(RpcStatus::TransferFault(FaultCode::Internal)))
            }
        };

        match handler {
            Some(handler) => handler(ctx),
            None => Box::pin(future::ready(RpcStatus::TransferFault(
                FaultCode::UnknownOperation,
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::{AccessMode, BulkDescriptor, BulkRegistry};

    struct NoTransfer(BulkRegistry);

    impl BulkTransfer for NoTransfer {
        fn register(&mut self, data: Vec<u8>, mode: AccessMode) -> BulkDescriptor {
            self.0.register(data, mode)
        }

        fn release(&mut self, descriptor: &BulkDescriptor) -> Option<Vec<u8>> {
            self.0.release(descriptor.id)
        }

        fn pull<'a>(
            &'a mut self,
            _remote: &'a BulkDescriptor,
            _remote_offset: u64,
            _local: &'a BulkDescriptor,
            _local_offset: u64,
            _length: u64,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(future::ready(Err(DimError::ConnectionClosed)))
        }

        fn push<'a>(
            &'a mut self,
            _remote: &'a BulkDescriptor,
            _remote_offset: u64,
            _local: &'a BulkDescriptor,
            _local_offset: u64,
            _length: u64,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(future::ready(Err(DimError::ConnectionClosed)))
        }
    }

    fn request(operation: Operation) -> RpcRequest {
        RpcRequest {
            operation,
            bulk: None,
            size: 0,
            key_id: "k".to_string(),
        }
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_routes_by_operation() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register(Operation::Evict, |_ctx| Box::pin(future::ready(RpcStatus::Ok)))
            .unwrap();
        dispatcher
            .register(Operation::Get, |_ctx| {
                Box::pin(future::ready(RpcStatus::NotFound))
            })
            .unwrap();

        let store = PeerStore::new();
        let mut transfer = NoTransfer(BulkRegistry::new());

        for (operation, expected) in [
            (Operation::Evict, RpcStatus::Ok),
            (Operation::Get, RpcStatus::NotFound),
            (
                Operation::Set,
                RpcStatus::TransferFault(FaultCode::UnknownOperation),
            ),
        ] {
            let req = request(operation);
            let status = dispatcher
                .dispatch(RpcContext {
                    store: &store,
                    transfer: &mut transfer,
                    request: &req,
                    max_object_size: 16,
                })
                .await;
            assert_eq!(status, expected, "operation {operation}");
        }

        assert_eq!(dispatcher.operations().unwrap(), vec!["evict", "get"]);
    }
}
