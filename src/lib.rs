//! # rcp-throttle
//!
//! Connection and protocol engine for a handheld locomotive throttle that
//! talks to a Rocrail server over its RCP protocol (XML messages over TCP).
//!
//! The engine keeps the link to the server alive, frames commands with the
//! size-carrying header the server expects, decodes the server's byte stream
//! into elements, maintains the locomotive roster, and gates speed commands
//! so a locomotive never jumps to whatever speed the dial happens to show
//! after a switch or a lost connection.
//!
//! Hardware stays outside: buttons and the dial come in through
//! [`InputProvider`](core::InputProvider), status goes out through
//! [`StatusSink`](core::StatusSink).
//!
//! ## Feature Flags
//!
//! - `transport` (default): TCP connector on tokio
//! - `client` (default): Task orchestrator ([`client::ThrottleClient`])
//!
//! ## Modules
//!
//! - [`core`]: Constants, errors and collaborator traits
//! - [`transport`]: Wire codec, receive buffer, link state machine, backoff
//! - [`control`]: Roster, safety gate, dial calibration, status projection
//! - [`client`]: The running throttle (requires `client` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use rcp_throttle::prelude::*;
//!
//! let frame = Command::speed("BR103", 40, true).encode();
//! assert_eq!(
//!     frame.as_bytes(),
//!     b"<xmlh><xml size=\"34\"/></xmlh><lc id=\"BR103\" V=\"40\" dir=\"true\"/>"
//! );
//!
//! let mut buffer = ReceiveBuffer::new(4096);
//! buffer.append(b"<lclist><lc id=\"BR103\"/><lc id=\"E94\"/></lclist>").unwrap();
//! let mut roster = RosterStore::new(5, None);
//! drain_elements(&mut buffer, |element| {
//!     roster.ingest(&element);
//! });
//! assert_eq!(roster.len(), 2);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Transport layer; only the TCP connector is feature-gated
pub mod transport;

// Control layer (always included)
pub mod control;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::control::*;
    pub use crate::core::*;
    pub use crate::transport::*;

    #[cfg(feature = "client")]
    pub use crate::client::{ConfigProvider, LinkStatus, ThrottleClient, ThrottleConfig};
}

// Re-export commonly used items at crate root
pub use core::{ConfigError, ThrottleError};
pub use transport::{Command, FrameError, LinkState, TransportError};

#[cfg(feature = "client")]
pub use client::{ThrottleClient, ThrottleConfig};
