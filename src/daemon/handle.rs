use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::bulk::{AccessMode, BulkDescriptor, BulkRegistry, BulkTransfer};
use crate::error::{DimError, Result};
use crate::protocol::message::Message;
use crate::transport::channel::Channel;
use crate::utils::timeout::with_timeout_error;

/// Daemon side of one client connection.
///
/// Bulk transfers run over the connection the request arrived on: each
/// chunk is a `BulkPull`/`BulkData` or `BulkPush`/`BulkAck` round trip with
/// the client engine, which checks its own side of the access rules.
/// Each round trip must complete within `chunk_timeout`.
pub struct PeerHandle<S> {
    channel: Channel<S>,
    registry: BulkRegistry,
    chunk_size: u64,
    chunk_timeout: Duration,
}

impl<S> PeerHandle<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(channel: Channel<S>, chunk_size: usize, chunk_timeout: Duration) -> Self {
        Self {
            channel,
            registry: BulkRegistry::new(),
            chunk_size: chunk_size.max(1) as u64,
            chunk_timeout,
        }
    }

    pub fn channel(&mut self) -> &mut Channel<S> {
        &mut self.channel
    }

    /// Regions a handler forgot to release.
    pub fn outstanding(&self) -> usize {
        self.registry.len()
    }

    async fn reply(&mut self) -> Result<Message> {
        with_timeout_error(self.channel.recv(), self.chunk_timeout).await
    }
}

fn check_remote(
    remote: &BulkDescriptor,
    offset: u64,
    length: u64,
    write: bool,
) -> Result<()> {
    let permitted = if write {
        remote.mode.writable()
    } else {
        remote.mode.readable()
    };
    if !permitted {
        return Err(DimError::AccessDenied {
            descriptor: remote.id,
            mode: remote.mode,
            operation: if write { "write" } else { "read" },
        });
    }
    match offset.checked_add(length) {
        Some(end) if end <= remote.size => Ok(()),
        _ => Err(DimError::OutOfBounds {
            descriptor: remote.id,
            offset,
            length,
            size: remote.size,
        }),
    }
}

impl<S> BulkTransfer for PeerHandle<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn register(&mut self, data: Vec<u8>, mode: AccessMode) -> BulkDescriptor {
        self.registry.register(data, mode)
    }

    fn release(&mut self, descriptor: &BulkDescriptor) -> Option<Vec<u8>> {
        self.registry.release(descriptor.id)
    }

    fn pull<'a>(
        &'a mut self,
        remote: &'a BulkDescriptor,
        remote_offset: u64,
        local: &'a BulkDescriptor,
        local_offset: u64,
        length: u64,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.registry
                .get(local.id)?
                .check(local_offset, length, true)?;
            check_remote(remote, remote_offset, length, false)?;

            let mut done = 0;
            while done < length {
                let step = self.chunk_size.min(length - done);
                self.channel
                    .send(&Message::BulkPull {
                        descriptor: remote.id,
                        offset: remote_offset + done,
                        length: step,
                    })
                    .await?;
                match self.reply().await? {
                    Message::BulkData(bytes) if bytes.len() as u64 == step => {
                        self.registry
                            .get_mut(local.id)?
                            .write(local_offset + done, &bytes)?;
                    }
                    Message::Fault(code) => return Err(DimError::RemoteFault(code)),
                    _ => return Err(DimError::UnexpectedMessage),
                }
                done += step;
            }
            Ok(())
        })
    }

    fn push<'a>(
        &'a mut self,
        remote: &'a BulkDescriptor,
        remote_offset: u64,
        local: &'a BulkDescriptor,
        local_offset: u64,
        length: u64,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.registry
                .get(local.id)?
                .check(local_offset, length, false)?;
            check_remote(remote, remote_offset, length, true)?;

            let mut done = 0;
            while done < length {
                let step = self.chunk_size.min(length - done);
                let data = self
                    .registry
                    .get(local.id)?
                    .read(local_offset + done, step)?
                    .to_vec();
                self.channel
                    .send(&Message::BulkPush {
                        descriptor: remote.id,
                        offset: remote_offset + done,
                        data,
                    })
                    .await?;
                match self.reply().await? {
                    Message::BulkAck => {}
                    Message::Fault(code) => return Err(DimError::RemoteFault(code)),
                    _ => return Err(DimError::UnexpectedMessage),
                }
                done += step;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::status::FaultCode;

    const CHUNK_TIMEOUT: Duration = Duration::from_secs(5);

    fn remote(mode: AccessMode, size: u64) -> BulkDescriptor {
        BulkDescriptor { id: 9, size, mode }
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_pull_is_chunked_and_reassembled() {
        let (a, b) = tokio::io::duplex(4096);
        let mut handle = PeerHandle::new(Channel::new(a), 2, CHUNK_TIMEOUT);
        let mut client = Channel::new(b);

        let source = b"hello".to_vec();
        let peer = tokio::spawn(async move {
            let mut requests = 0;
            while let Ok(Message::BulkPull { offset, length, .. }) = client.recv().await {
                requests += 1;
                let start = offset as usize;
                let chunk = source[start..start + length as usize].to_vec();
                client.send(&Message::BulkData(chunk)).await.unwrap();
            }
            requests
        });

        let remote = remote(AccessMode::ReadOnly, 5);
        let local = handle.register(vec![0; 5], AccessMode::WriteOnly);
        handle.pull(&remote, 0, &local, 0, 5).await.unwrap();
        assert_eq!(handle.release(&local).unwrap(), b"hello");
        assert_eq!(handle.outstanding(), 0);

        drop(handle);
        assert_eq!(peer.await.unwrap(), 3);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_push_surfaces_remote_fault() {
        let (a, b) = tokio::io::duplex(4096);
        let mut handle = PeerHandle::new(Channel::new(a), 16, CHUNK_TIMEOUT);
        let mut client = Channel::new(b);

        let peer = tokio::spawn(async move {
            let _ = client.recv().await;
            client
                .send(&Message::Fault(FaultCode::OutOfBounds))
                .await
                .unwrap();
        });

        let remote = remote(AccessMode::ReadWrite, 4);
        let local = handle.register(b"data".to_vec(), AccessMode::ReadOnly);
        let err = handle.push(&remote, 0, &local, 0, 4).await.unwrap_err();
        assert!(matches!(err, DimError::RemoteFault(FaultCode::OutOfBounds)));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_access_rules_are_checked_before_any_frame() {
        let (a, _b) = tokio::io::duplex(64);
        let mut handle = PeerHandle::new(Channel::new(a), 16, CHUNK_TIMEOUT);

        let local = handle.register(vec![0; 4], AccessMode::WriteOnly);
        let write_only = remote(AccessMode::WriteOnly, 4);
        assert!(matches!(
            handle.pull(&write_only, 0, &local, 0, 4).await,
            Err(DimError::AccessDenied { operation: "read", .. })
        ));

        let readable = remote(AccessMode::ReadOnly, 2);
        assert!(matches!(
            handle.pull(&readable, 0, &local, 0, 4).await,
            Err(DimError::OutOfBounds { size: 2, .. })
        ));

        // the local region is write-only, so it cannot be the source of a push
        let target = remote(AccessMode::WriteOnly, 4);
        assert!(matches!(
            handle.push(&target, 0, &local, 0, 4).await,
            Err(DimError::AccessDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out_mid_pull() {
        let (a, b) = tokio::io::duplex(4096);
        let mut handle = PeerHandle::new(Channel::new(a), 2, Duration::from_millis(50));
        let mut client = Channel::new(b);

        // answers the first chunk, then goes quiet
        let peer = tokio::spawn(async move {
            if let Ok(Message::BulkPull { length, .. }) = client.recv().await {
                let _ = client.send(&Message::BulkData(vec![7; length as usize])).await;
            }
            let _ = client.recv().await;
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let remote = remote(AccessMode::ReadOnly, 6);
        let local = handle.register(vec![0; 6], AccessMode::WriteOnly);
        let started = std::time::Instant::now();
        let err = handle.pull(&remote, 0, &local, 0, 6).await.unwrap_err();
        assert!(matches!(err, DimError::Timeout));
        assert_eq!(err.fault_code(), FaultCode::Timeout);
        assert!(started.elapsed() < Duration::from_millis(900));
        peer.abort();
    }
}
