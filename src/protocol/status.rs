//! Response status carried back to the caller of every RPC.
//!
//! The daemon used to answer with the bare sentinels `"OK"` and `"ERROR"`.
//! [`RpcStatus`] keeps that one-bit contract available through
//! [`RpcStatus::sentinel`] while telling a missing key apart from a failed
//! transfer, and carrying a [`FaultCode`] for the latter.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Legacy success sentinel.
pub const STATUS_OK: &str = "OK";
/// Legacy failure sentinel.
pub const STATUS_ERROR: &str = "ERROR";

/// Diagnostic code attached to a failed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultCode {
    /// The request did not carry a bulk descriptor the operation needs.
    MissingDescriptor,
    /// The declared size could not be allocated by the daemon.
    AllocationFailed,
    /// Pulling from the caller's region failed.
    PullFailed,
    /// Pushing into the caller's region failed.
    PushFailed,
    /// A region was accessed against its access mode.
    AccessDenied,
    /// A transfer range fell outside a registered region.
    OutOfBounds,
    /// A transfer named a descriptor that is not registered.
    UnknownDescriptor,
    /// No handler is registered for the requested operation.
    UnknownOperation,
    /// The request could not be decoded.
    MalformedRequest,
    /// A bulk round trip exceeded its deadline.
    Timeout,
    /// The connection to the caller broke mid-transfer.
    ConnectionLost,
    /// Daemon-internal failure (poisoned lock and the like).
    Internal,
}

impl FaultCode {
    /// Numeric diagnostic code, stable across releases.
    pub fn code(self) -> u16 {
        match self {
            FaultCode::MissingDescriptor => 1,
            FaultCode::AllocationFailed => 2,
            FaultCode::PullFailed => 3,
            FaultCode::PushFailed => 4,
            FaultCode::AccessDenied => 5,
            FaultCode::OutOfBounds => 6,
            FaultCode::UnknownDescriptor => 7,
            FaultCode::UnknownOperation => 8,
            FaultCode::MalformedRequest => 9,
            FaultCode::Timeout => 10,
            FaultCode::ConnectionLost => 11,
            FaultCode::Internal => 12,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FaultCode::MissingDescriptor => "missing-descriptor",
            FaultCode::AllocationFailed => "allocation-failed",
            FaultCode::PullFailed => "pull-failed",
            FaultCode::PushFailed => "push-failed",
            FaultCode::AccessDenied => "access-denied",
            FaultCode::OutOfBounds => "out-of-bounds",
            FaultCode::UnknownDescriptor => "unknown-descriptor",
            FaultCode::UnknownOperation => "unknown-operation",
            FaultCode::MalformedRequest => "malformed-request",
            FaultCode::Timeout => "timeout",
            FaultCode::ConnectionLost => "connection-lost",
            FaultCode::Internal => "internal",
        }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.name(), self.code())
    }
}

/// Tagged result of a single RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcStatus {
    Ok,
    NotFound,
    TransferFault(FaultCode),
}

impl RpcStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, RpcStatus::Ok)
    }

    /// One-bit view of the status, as older daemons reported it.
    pub fn sentinel(self) -> &'static str {
        match self {
            RpcStatus::Ok => STATUS_OK,
            RpcStatus::NotFound | RpcStatus::TransferFault(_) => STATUS_ERROR,
        }
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcStatus::Ok => f.write_str(STATUS_OK),
            RpcStatus::NotFound => f.write_str("NOT_FOUND"),
            RpcStatus::TransferFault(code) => write!(f, "TRANSFER_FAULT[{code}]"),
        }
    }
}
