//! # dim-transport
//!
//! Direct interconnect transport: every node runs a peer daemon that owns an
//! in-memory `key → bytes` map, and clients move objects in and out of those
//! daemons through registered bulk buffers instead of request payloads.
//!
//! ## Layout
//! - [`client`]: the process-facing client and its byte-transport contract
//! - [`daemon`]: the peer daemon, its store and its process lifecycle
//! - [`bulk`]: buffer registration and the bulk transfer abstraction
//! - [`protocol`]: messages, statuses and the operation dispatch table
//! - [`transport`]: addressing, framed channels and the client RPC engine
//! - [`core`]: packet format and stream codec
//!
//! The `dimd` binary wraps [`PeerDaemon`] and is what [`DimClient::connect`]
//! spawns when no daemon is listening yet.

pub mod bulk;
pub mod client;
pub mod config;
pub mod core;
pub mod daemon;
pub mod error;
pub mod key;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use bulk::{AccessMode, BulkDescriptor, BulkTransfer};
pub use client::{ByteTransport, DimClient};
pub use config::DimConfig;
pub use daemon::{DaemonHandle, DaemonState, PeerDaemon, PeerStore, ServerState};
pub use error::{DimError, Result};
pub use key::StoreKey;
pub use protocol::status::{FaultCode, RpcStatus};
pub use transport::address::{PeerUrl, Protocol};
