//! Protocol and device constants.
//!
//! Defaults for everything that [`ThrottleConfig`](crate::client::ThrottleConfig)
//! can override live here, grouped by concern.

use std::time::Duration;

// =============================================================================
// WIRE PROTOCOL
// =============================================================================

/// Default RCP server port.
pub const DEFAULT_PORT: u16 = 8051;

/// Header wrapper element name.
pub const HEADER_WRAPPER_TAG: &str = "xmlh";

/// Header element carrying the body size.
pub const HEADER_TAG: &str = "xml";

/// Header attribute holding the exact body byte length.
pub const HEADER_SIZE_ATTR: &str = "size";

/// Locomotive element (speed commands, roster entries, status updates).
pub const LOCO_TAG: &str = "lc";

/// Function element.
pub const FUNCTION_TAG: &str = "fn";

/// Locomotive list element wrapping roster entries.
pub const LOCO_LIST_TAG: &str = "lclist";

/// Model element used for roster queries.
pub const MODEL_TAG: &str = "model";

/// System element used for the heartbeat exchange.
pub const SYSTEM_TAG: &str = "sys";

// =============================================================================
// BUFFERS
// =============================================================================

/// Smallest receive buffer that still holds one roster entry.
pub const MIN_RECEIVE_BUFFER: usize = 4096;

/// Default receive buffer capacity.
pub const DEFAULT_RECEIVE_BUFFER: usize = 4096;

/// Upper bound on a single socket read.
pub const READ_CHUNK_SIZE: usize = 512;

/// Default outbound FIFO depth.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 32;

// =============================================================================
// RECONNECTION
// =============================================================================

/// Default backoff schedule. The last entry is the plateau.
pub const DEFAULT_BACKOFF: [Duration; 5] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

/// TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// TASK CADENCE
// =============================================================================

/// Button and dial sampling interval.
pub const INPUT_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

/// Minimum spacing between speed submissions.
pub const SPEED_UPDATE_INTERVAL: Duration = Duration::from_millis(333);

/// Status projection interval.
pub const STATUS_INTERVAL: Duration = Duration::from_millis(500);

/// Idle time after which the heartbeat exchange is issued.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Time the server has to answer a heartbeat before the link counts as lost.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);

/// Identical commands are re-sent after this long.
pub const COMMAND_REPEAT_INTERVAL: Duration = Duration::from_secs(5);

// =============================================================================
// ROSTER AND INPUT
// =============================================================================

/// Maximum locomotives kept in the roster (one selection LED each).
pub const DEFAULT_ROSTER_LIMIT: usize = 5;

/// Locomotive used until the server roster arrives.
pub const DEFAULT_LOCO_ID: &str = "BR103";

/// Raw dial reading at the bottom of its travel.
pub const DEFAULT_CALIBRATION_MIN: u16 = 1310;

/// Raw dial reading at the top of its travel.
pub const DEFAULT_CALIBRATION_MAX: u16 = 2360;

/// Highest speed value on the wire.
pub const MAX_SPEED: u8 = 100;

/// Dial readings averaged per calibrated sample.
pub const DEFAULT_SMOOTHING_WINDOW: usize = 5;

/// Function index toggled by the light button.
pub const LIGHT_FUNCTION: u8 = 0;

/// Function index toggled by the sound button.
pub const SOUND_FUNCTION: u8 = 1;
