//! # Peer Daemon
//!
//! The process that owns a node's objects and serves them to remote clients.
//!
//! ## Components
//! - **store**: the in-memory `key → bytes` map owned by one daemon
//! - **handle**: bulk transfer bound to the connection of a request
//! - **handlers**: the `set` / `get` / `exists` / `evict` operations
//! - **server**: listener loop, connection tasks and the finalize hook
//! - **process**: spawning, attaching to and stopping a daemon process

pub mod handle;
pub mod handlers;
pub mod process;
pub mod server;
pub mod store;

pub use process::{wait_for_server, DaemonProcess, DaemonState};
pub use server::{DaemonHandle, PeerDaemon, ServerState};
pub use store::PeerStore;
