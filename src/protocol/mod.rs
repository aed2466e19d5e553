//! # Protocol Layer
//!
//! What travels inside each framed packet and how the daemon routes it.
//!
//! ## Components
//! - **Message**: RPC envelope, bulk transfer frames, shutdown control
//! - **Status**: tagged per-RPC result with diagnostic fault codes
//! - **Dispatcher**: operation name → handler table
//!
//! ## Exchange
//! ```text
//! client                         daemon
//!   Request{op, bulk, size, key} ->
//!                               <- BulkPull / BulkPush   (zero or more)
//!   BulkData / BulkAck / Fault   ->
//!                               <- Response{status}
//! ```

pub mod dispatcher;
pub mod message;
pub mod status;
