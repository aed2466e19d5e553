//! # Transport Layer
//!
//! Client-side plumbing between a process and the peer daemons it talks to.
//!
//! ## Components
//! - **address**: protocol tags, `protocol://host:port` peer URLs, host resolution
//! - **channel**: a framed message stream over any async byte stream
//! - **engine**: connection cache, bulk registrations and the RPC call loop
//!
//! Bulk transfers are carried in-band: while a call is outstanding the engine
//! answers the daemon's pull and push frames against its own registrations,
//! so no payload ever rides inside a request or a response.

pub mod address;
pub mod channel;
pub mod engine;
