//! Control layer: roster, safety gate, dial calibration and status.
//!
//! Pure state, no I/O. The client tasks drive these types.

mod calibration;
mod gate;
mod roster;
mod status;

pub use calibration::*;
pub use gate::*;
pub use roster::*;
pub use status::*;
