//! Core constants, error types and collaborator traits.

pub mod constants;
mod error;
mod traits;

pub use error::*;
pub use traits::*;
