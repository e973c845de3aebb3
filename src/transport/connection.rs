//! Connection lifecycle state machine.
//!
//! ```text
//!   Disconnected --ConnectRequested--> Connecting
//!   Connecting   --ConnectSucceeded--> Connected
//!   Connecting   --ConnectFailed-----> Recovering
//!   Connected    --Send/ReceiveFailed> Recovering
//!   Recovering   --RetryDue----------> Connecting   (only if no attempt in flight)
//!   any          --Shutdown----------> Disconnected
//! ```
//!
//! The machine owns the [`ReconnectPolicy`], so link state and the in-flight
//! flag are always updated together.

use std::fmt;
use std::time::Duration;

use super::reconnect::{ReconnectContext, ReconnectPolicy};

/// Link lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkState {
    /// No transport and no attempt pending.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Transport is up.
    Connected,
    /// Transport was lost or never came up; waiting to retry.
    Recovering,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Recovering => "recovering",
        };
        f.write_str(name)
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Explicit request to bring the link up.
    ConnectRequested,
    /// The in-flight attempt produced a transport.
    ConnectSucceeded,
    /// The in-flight attempt failed.
    ConnectFailed,
    /// A write on the given session succeeded.
    SendSucceeded {
        /// Session the write belonged to.
        session: u64,
    },
    /// A write on the given session failed.
    SendFailed {
        /// Session the write belonged to.
        session: u64,
    },
    /// A read on the given session returned data.
    ReceiveSucceeded {
        /// Session the read belonged to.
        session: u64,
    },
    /// A read on the given session failed or hit end of stream.
    ReceiveFailed {
        /// Session the read belonged to.
        session: u64,
    },
    /// The backoff delay has elapsed.
    RetryDue,
    /// Stop everything.
    Shutdown,
}

/// A state change produced by [`ConnectionStateMachine::handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before the event.
    pub from: LinkState,
    /// State after the event.
    pub to: LinkState,
    /// Session number after the event.
    pub session: u64,
}

impl Transition {
    /// Whether this transition entered Connected.
    pub fn entered_connected(&self) -> bool {
        self.to == LinkState::Connected && self.from != LinkState::Connected
    }

    /// Whether this transition left Connected.
    pub fn left_connected(&self) -> bool {
        self.from == LinkState::Connected && self.to != LinkState::Connected
    }
}

/// Send and receive outcomes of the current session.
///
/// Tracked separately: a link that can still write but never reads is not
/// healthy, and the other way round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkHealth {
    /// Successful writes this session.
    pub sends_ok: u64,
    /// Successful reads this session.
    pub receives_ok: u64,
    /// Last write failed.
    pub send_failed: bool,
    /// Last read failed.
    pub receive_failed: bool,
}

/// Tracks link health and drives the connection lifecycle.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStateMachine {
    state: LinkState,
    session: u64,
    health: LinkHealth,
    policy: ReconnectPolicy,
}

impl ConnectionStateMachine {
    /// Create a machine in `Disconnected` using the given policy.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: LinkState::Disconnected,
            session: 0,
            health: LinkHealth::default(),
            policy,
        }
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Current session number. Increments on every entry to Connected.
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Send/receive outcomes of the current session.
    pub fn health(&self) -> LinkHealth {
        self.health
    }

    /// Reconnection bookkeeping.
    pub fn reconnect(&self) -> ReconnectContext {
        self.policy.context()
    }

    /// Wait before the next retry.
    pub fn retry_delay(&self) -> Duration {
        self.policy.next_delay()
    }

    /// Apply an event. Returns the transition, or `None` if the event was
    /// ignored in the current state.
    pub fn handle(&mut self, event: LinkEvent) -> Option<Transition> {
        let from = self.state;
        let to = match (from, event) {
            (LinkState::Disconnected, LinkEvent::ConnectRequested) => {
                if !self.policy.try_claim() {
                    return None;
                }
                LinkState::Connecting
            }
            (LinkState::Recovering, LinkEvent::RetryDue) => {
                self.policy.try_begin_retry()?;
                LinkState::Connecting
            }
            (LinkState::Connecting, LinkEvent::ConnectSucceeded) => {
                self.policy.on_success();
                self.session += 1;
                self.health = LinkHealth::default();
                LinkState::Connected
            }
            (LinkState::Connecting, LinkEvent::ConnectFailed) => {
                self.policy.on_failure();
                LinkState::Recovering
            }
            (LinkState::Connected, LinkEvent::SendSucceeded { session })
                if session == self.session =>
            {
                self.health.sends_ok += 1;
                self.health.send_failed = false;
                return None;
            }
            (LinkState::Connected, LinkEvent::ReceiveSucceeded { session })
                if session == self.session =>
            {
                self.health.receives_ok += 1;
                self.health.receive_failed = false;
                return None;
            }
            (LinkState::Connected, LinkEvent::SendFailed { session })
                if session == self.session =>
            {
                self.health.send_failed = true;
                LinkState::Recovering
            }
            (LinkState::Connected, LinkEvent::ReceiveFailed { session })
                if session == self.session =>
            {
                self.health.receive_failed = true;
                LinkState::Recovering
            }
            (LinkState::Disconnected, LinkEvent::Shutdown) => return None,
            (_, LinkEvent::Shutdown) => {
                self.policy.reset();
                LinkState::Disconnected
            }
            _ => return None,
        };

        self.state = to;
        Some(Transition {
            from,
            to,
            session: self.session,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::BackoffSchedule;

    fn connected() -> ConnectionStateMachine {
        let mut machine = ConnectionStateMachine::default();
        machine.handle(LinkEvent::ConnectRequested).unwrap();
        machine.handle(LinkEvent::ConnectSucceeded).unwrap();
        machine
    }

    #[test]
    fn test_connect_lifecycle() {
        let mut machine = ConnectionStateMachine::default();
        assert_eq!(machine.state(), LinkState::Disconnected);

        let t = machine.handle(LinkEvent::ConnectRequested).unwrap();
        assert_eq!((t.from, t.to), (LinkState::Disconnected, LinkState::Connecting));
        assert!(machine.reconnect().in_flight);

        let t = machine.handle(LinkEvent::ConnectSucceeded).unwrap();
        assert!(t.entered_connected());
        assert_eq!(t.session, 1);
        assert!(!machine.reconnect().in_flight);
    }

    #[test]
    fn test_connect_failure_enters_recovering() {
        let mut machine = ConnectionStateMachine::default();
        machine.handle(LinkEvent::ConnectRequested);
        let t = machine.handle(LinkEvent::ConnectFailed).unwrap();
        assert_eq!(t.to, LinkState::Recovering);
        assert!(!machine.reconnect().in_flight);
        assert_eq!(machine.retry_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_send_and_receive_failures_leave_connected() {
        let mut machine = connected();
        let t = machine.handle(LinkEvent::SendFailed { session: 1 }).unwrap();
        assert!(t.left_connected());
        assert!(machine.health().send_failed);
        assert!(!machine.health().receive_failed);

        let mut machine = connected();
        machine.handle(LinkEvent::ReceiveFailed { session: 1 }).unwrap();
        assert_eq!(machine.state(), LinkState::Recovering);
        assert!(machine.health().receive_failed);
    }

    #[test]
    fn test_stale_session_failure_is_ignored() {
        let mut machine = connected();
        machine.handle(LinkEvent::ReceiveFailed { session: 1 });
        machine.handle(LinkEvent::RetryDue).unwrap();
        machine.handle(LinkEvent::ConnectSucceeded).unwrap();
        assert_eq!(machine.session(), 2);

        // The dispatcher of session 1 reports late.
        assert_eq!(machine.handle(LinkEvent::SendFailed { session: 1 }), None);
        assert_eq!(machine.state(), LinkState::Connected);
    }

    #[test]
    fn test_success_counters_are_independent() {
        let mut machine = connected();
        machine.handle(LinkEvent::SendSucceeded { session: 1 });
        machine.handle(LinkEvent::SendSucceeded { session: 1 });
        machine.handle(LinkEvent::ReceiveSucceeded { session: 1 });
        assert_eq!(machine.health().sends_ok, 2);
        assert_eq!(machine.health().receives_ok, 1);
    }

    #[test]
    fn test_retry_only_when_nothing_in_flight() {
        let mut machine = ConnectionStateMachine::default();
        machine.handle(LinkEvent::ConnectRequested);
        machine.handle(LinkEvent::ConnectFailed);

        assert!(machine.handle(LinkEvent::RetryDue).is_some());
        // A second monitor firing at the same time finds Connecting.
        assert_eq!(machine.handle(LinkEvent::RetryDue), None);
        assert_eq!(machine.reconnect().attempt_count, 1);
    }

    #[test]
    fn test_backoff_follows_schedule_and_resets() {
        let schedule = BackoffSchedule::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(5),
        ])
        .unwrap();
        let mut machine = ConnectionStateMachine::new(ReconnectPolicy::new(schedule));
        machine.handle(LinkEvent::ConnectRequested);
        machine.handle(LinkEvent::ConnectFailed);

        let mut delays = vec![machine.retry_delay()];
        for _ in 0..3 {
            machine.handle(LinkEvent::RetryDue).unwrap();
            machine.handle(LinkEvent::ConnectFailed).unwrap();
            delays.push(machine.retry_delay());
        }
        assert_eq!(delays.iter().map(|d| d.as_secs()).collect::<Vec<_>>(), vec![1, 2, 5, 5]);

        machine.handle(LinkEvent::RetryDue).unwrap();
        machine.handle(LinkEvent::ConnectSucceeded).unwrap();
        machine.handle(LinkEvent::SendFailed { session: 1 }).unwrap();
        assert_eq!(machine.retry_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_shutdown_from_any_state() {
        let mut machine = connected();
        let t = machine.handle(LinkEvent::Shutdown).unwrap();
        assert_eq!(t.to, LinkState::Disconnected);

        let mut machine = ConnectionStateMachine::default();
        machine.handle(LinkEvent::ConnectRequested);
        machine.handle(LinkEvent::Shutdown).unwrap();
        assert!(!machine.reconnect().in_flight);

        assert_eq!(machine.handle(LinkEvent::Shutdown), None);
    }

    #[test]
    fn test_irrelevant_events_are_ignored() {
        let mut machine = ConnectionStateMachine::default();
        assert_eq!(machine.handle(LinkEvent::ConnectSucceeded), None);
        assert_eq!(machine.handle(LinkEvent::RetryDue), None);
        assert_eq!(machine.handle(LinkEvent::SendFailed { session: 0 }), None);
        assert_eq!(machine.state(), LinkState::Disconnected);
    }
}
