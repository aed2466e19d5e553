//! # Bulk Buffers
//!
//! Registration of byte regions for direct remote access.
//!
//! A side that wants a peer to read or write one of its buffers registers it
//! with an [`AccessMode`] and ships the resulting [`BulkDescriptor`] inside an
//! RPC. The peer then *pulls* from or *pushes* into that region through a
//! [`BulkTransfer`] implementation, instead of the payload riding inside the
//! request or the response.
//!
//! ## Access rules
//! - pull: the remote (source) region must be readable, the local one writable
//! - push: the local region must be readable, the remote (destination) one writable
//!
//! Every registration must be released once the RPC that uses it completes,
//! on the error path too.

pub mod region;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

pub use region::{zeroed_buffer, BulkRegion, BulkRegistry};

/// Access permitted on a registered region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn readable(self) -> bool {
        matches!(self, AccessMode::ReadOnly | AccessMode::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessMode::ReadOnly => "read-only",
            AccessMode::WriteOnly => "write-only",
            AccessMode::ReadWrite => "read-write",
        })
    }
}

/// Wire description of a registered region: enough for a peer to address it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BulkDescriptor {
    /// Registration id, unique within the registering side's registry
    pub id: u64,
    /// Region length in bytes
    pub size: u64,
    pub mode: AccessMode,
}

/// Direct transfer between a local registration and a peer's descriptor.
///
/// The peer is implicit: an implementation is bound to the connection of
/// the request being served, so `self` plays the role of the remote handle.
/// Registration lives here as well so one backend supplies everything the
/// RPC handlers need.
pub trait BulkTransfer: Send {
    /// Register `data` locally with `mode`.
    fn register(&mut self, data: Vec<u8>, mode: AccessMode) -> BulkDescriptor;

    /// Deregister a local region, handing its bytes back.
    fn release(&mut self, descriptor: &BulkDescriptor) -> Option<Vec<u8>>;

    /// Copy `length` bytes from the peer's `remote` region into the local one.
    fn pull<'a>(
        &'a mut self,
        remote: &'a BulkDescriptor,
        remote_offset: u64,
        local: &'a BulkDescriptor,
        local_offset: u64,
        length: u64,
    ) -> BoxFuture<'a, Result<()>>;

    /// Copy `length` bytes from the local region into the peer's `remote` one.
    fn push<'a>(
        &'a mut self,
        remote: &'a BulkDescriptor,
        remote_offset: u64,
        local: &'a BulkDescriptor,
        local_offset: u64,
        length: u64,
    ) -> BoxFuture<'a, Result<()>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_mode_permissions() {
        assert!(AccessMode::ReadOnly.readable());
        assert!(!AccessMode::ReadOnly.writable());
        assert!(!AccessMode::WriteOnly.readable());
        assert!(AccessMode::WriteOnly.writable());
        assert!(AccessMode::ReadWrite.readable());
        assert!(AccessMode::ReadWrite.writable());
    }
}
