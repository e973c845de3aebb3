//! Task orchestrator.
//!
//! Runs the input, dispatch, receive, connection monitor, status and
//! heartbeat tasks over shared state.

#[allow(clippy::module_inception)]
mod client;
mod config;
mod context;
#[cfg(test)]
mod mock;
mod tasks;

pub use client::*;
pub use config::*;
pub use context::LinkStatus;
