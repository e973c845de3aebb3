//! Transport layer: wire codec, receive buffer, link lifecycle and sockets.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │      Control (roster, gate, status)     │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │  frames, buffer, link state, backoff    │
//! ├─────────────────────────────────────────┤
//! │              TCP                        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Everything except the TCP connector is synchronous and runtime-free; the
//! connector needs the `transport` feature.

mod buffer;
mod connection;
mod error;
mod frame;
mod reconnect;
#[cfg(feature = "transport")]
mod socket;

pub use buffer::*;
pub use connection::*;
pub use error::*;
pub use frame::*;
pub use reconnect::*;
#[cfg(feature = "transport")]
pub use socket::*;
