//! # Utility Modules
//!
//! Supporting utilities shared by the client, the daemon and the `dimd`
//! binary.
//!
//! ## Components
//! - **Logging**: tracing subscriber configuration
//! - **Timeout**: default deadlines and async timeout wrappers

pub mod logging;
pub mod timeout;
