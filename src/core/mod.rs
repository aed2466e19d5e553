//! # Core Protocol Components
//!
//! Low-level packet handling and stream framing.
//!
//! ## Components
//! - **Packet**: Binary packet format with magic bytes and a length prefix
//! - **Codec**: Tokio codec for framing over byte streams
//!
//! ## Wire Format
//! ```text
//! [Magic(4)] [Version(1)] [Length(4)] [Payload(N)]
//! ```
//!
//! ## Limits
//! - Maximum packet payload: 16MB; bulk transfers above that are chunked
//! - Length is validated before any allocation

pub mod codec;
pub mod packet;
