//! # Error Types
//!
//! Error handling for the direct interconnect transport.
//!
//! This module defines every error variant a client, daemon or bulk transfer
//! can surface, from low-level I/O failures up to the store-level taxonomy
//! (`NotFound`, `Transfer`, `Probe`, ...).
//!
//! ## Error Categories
//! - **Construction**: address resolution, daemon startup, configuration
//! - **Store outcomes**: missing keys, failed transfers, failed probes
//! - **Bulk transfer**: access-mode violations, out-of-range regions
//! - **Wire**: invalid frames, oversized packets, closed connections
//!
//! Daemon handlers never return these errors to the remote side. They are
//! folded into a [`FaultCode`] at the dispatch boundary and only the code
//! travels on the wire.
//!
//! ## Example Usage
//! ```rust,no_run
//! use dim_transport::error::{DimError, Result};
//! use dim_transport::DimClient;
//! use tracing::{info, warn};
//!
//! async fn fetch(client: &DimClient, key: &dim_transport::StoreKey) -> Result<Option<Vec<u8>>> {
//!     match client.get_bytes(key).await {
//!         Ok(bytes) => Ok(Some(bytes)),
//!         Err(DimError::NotFound(id)) => {
//!             info!(key = %id, "object not present on owner");
//!             Ok(None)
//!         }
//!         Err(e) => {
//!             warn!(error = %e, "get failed");
//!             Err(e)
//!         }
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

use crate::bulk::AccessMode;
use crate::protocol::status::FaultCode;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";
    pub const ERR_STORE_LOCK: &str = "Failed to acquire lock on peer store";

    pub const ERR_CLIENT_CLOSED: &str = "Client has been closed";
    pub const ERR_ENGINE_FINALIZED: &str = "Engine has been finalized";

    pub const ERR_MISSING_READY_LINE: &str = "Daemon exited before reporting readiness";
    pub const ERR_MALFORMED_READY_LINE: &str = "Daemon readiness line is malformed";
}

#[derive(Error, Debug)]
pub enum DimError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Address resolution failed: {0}")]
    AddressResolution(String),

    #[error("Invalid peer address: {0}")]
    InvalidAddress(String),

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Daemon startup failed: {0}")]
    DaemonStartup(String),

    #[error("Transfer failed for key {key}: {code}")]
    Transfer { key: String, code: FaultCode },

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Existence probe failed for key {key}: {reason}")]
    Probe { key: String, reason: String },

    #[error("Bulk descriptor {descriptor} does not permit {operation} (mode: {mode})")]
    AccessDenied {
        descriptor: u64,
        mode: AccessMode,
        operation: &'static str,
    },

    #[error("Bulk range {offset}+{length} exceeds descriptor {descriptor} of {size} bytes")]
    OutOfBounds {
        descriptor: u64,
        offset: u64,
        length: u64,
        size: u64,
    },

    #[error("Unknown bulk descriptor: {0}")]
    UnknownDescriptor(u64),

    #[error("Remote bulk fault: {0}")]
    RemoteFault(FaultCode),

    #[error("Allocation of {0} bytes failed")]
    Allocation(u64),

    #[error("Invalid protocol header")]
    InvalidHeader,

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Unexpected message type")]
    UnexpectedMessage,

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("RPC not registered on this engine: {0}")]
    UnregisteredRpc(&'static str),

    #[error("Closed: {0}")]
    Closed(&'static str),
}

impl DimError {
    /// Diagnostic code sent on the wire when this error ends a daemon handler.
    pub fn fault_code(&self) -> FaultCode {
        match self {
            DimError::AccessDenied { .. } => FaultCode::AccessDenied,
            DimError::OutOfBounds { .. } => FaultCode::OutOfBounds,
            DimError::UnknownDescriptor(_) => FaultCode::UnknownDescriptor,
            DimError::RemoteFault(code) => *code,
            DimError::Allocation(_) => FaultCode::AllocationFailed,
            DimError::Timeout => FaultCode::Timeout,
            DimError::LockPoisoned(_) => FaultCode::Internal,
            DimError::Serialization(_) | DimError::UnexpectedMessage => FaultCode::MalformedRequest,
            _ => FaultCode::ConnectionLost,
        }
    }
}

/// Type alias for Results using DimError
pub type Result<T> = std::result::Result<T, DimError>;
