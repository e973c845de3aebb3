//! Command gate.
//!
//! Sits between the input task and the outbound queue. Two jobs:
//!
//! 1. Forced-zero arming. After a locomotive switch, a direction change, an
//!    emergency stop or a lost link, the dial may still stand at some
//!    arbitrary position. While armed, every non-zero speed is rewritten to
//!    zero until the dial is seen at exactly zero.
//! 2. Repeat suppression. A command identical to the last one sent for the
//!    same locomotive and command kind is dropped unless the repeat interval
//!    has passed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::core::constants::COMMAND_REPEAT_INTERVAL;
use crate::transport::{Command, CommandKind};

/// Arming state of the gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SafetyGateState {
    /// Speed is forced to zero until the live input reads zero.
    pub armed_zero_required: bool,
}

/// Safety and de-duplication filter for outbound commands.
#[derive(Debug, Clone)]
pub struct CommandGate {
    state: SafetyGateState,
    repeat_interval: Duration,
    last_sent: HashMap<(String, CommandKind), (Command, Instant)>,
}

impl Default for CommandGate {
    fn default() -> Self {
        Self::new(COMMAND_REPEAT_INTERVAL)
    }
}

impl CommandGate {
    /// Create a disarmed gate.
    pub fn new(repeat_interval: Duration) -> Self {
        Self {
            state: SafetyGateState::default(),
            repeat_interval,
            last_sent: HashMap::new(),
        }
    }

    /// Current arming state.
    pub fn state(&self) -> SafetyGateState {
        self.state
    }

    /// Whether speed is currently forced to zero.
    pub fn is_armed(&self) -> bool {
        self.state.armed_zero_required
    }

    /// Require the dial to return to zero before speed takes effect.
    pub fn arm(&mut self) {
        if !self.state.armed_zero_required {
            tracing::debug!("speed gate armed");
        }
        self.state.armed_zero_required = true;
    }

    /// The link went down: re-arm and forget what was sent.
    pub fn on_link_lost(&mut self) {
        self.arm();
        self.last_sent.clear();
    }

    /// Feed a live calibrated input value. Disarms on exactly zero.
    pub fn observe(&mut self, live_input: u8) {
        if self.state.armed_zero_required && live_input == 0 {
            self.state.armed_zero_required = false;
            tracing::debug!("speed gate released");
        }
    }

    /// Filter a candidate command.
    ///
    /// Returns the command to send, possibly rewritten to zero speed, or
    /// `None` when it repeats the last one sent too soon. System commands
    /// pass through untouched.
    pub fn filter(&mut self, command: Command, live_input: u8, now: Instant) -> Option<Command> {
        self.observe(live_input);

        let command = match command {
            Command::Speed {
                loco_id,
                value,
                forward,
            } if self.state.armed_zero_required && value != 0 => Command::Speed {
                loco_id,
                value: 0,
                forward,
            },
            other => other,
        };

        let (Some(loco_id), Some(kind)) = (command.loco_id(), command.kind()) else {
            return Some(command);
        };
        let key = (loco_id.to_string(), kind);

        if let Some((previous, sent_at)) = self.last_sent.get(&key) {
            if *previous == command && now.saturating_duration_since(*sent_at) < self.repeat_interval {
                return None;
            }
        }
        self.last_sent.insert(key, (command.clone(), now));
        Some(command)
    }
}
