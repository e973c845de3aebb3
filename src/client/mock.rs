//! Test doubles for the throttle tasks.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::control::StatusSnapshot;
use crate::core::{Button, InputProvider, InputSample, StatusSink};
use crate::transport::{Connector, Endpoint, TransportError, TransportHalves, TransportResult};

/// What the next connect attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Refuse,
    Accept,
}

/// Scripted connector. Accepted connections hand the server side of an
/// in-memory duplex stream to the test.
pub(crate) struct MockConnector {
    script: Mutex<VecDeque<Outcome>>,
    latency: Duration,
    accepted: mpsc::UnboundedSender<DuplexStream>,
    attempts: Mutex<Vec<Instant>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl MockConnector {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: Mutex::new(VecDeque::new()),
            latency: Duration::ZERO,
            accepted,
            attempts: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        };
        (connector, rx)
    }

    /// Outcomes of the next attempts. Attempts past the script accept.
    pub(crate) fn script(self, outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        self.script.lock().unwrap().extend(outcomes);
        self
    }

    pub(crate) fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    pub(crate) fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    async fn connect(&self, _endpoint: &Endpoint) -> TransportResult<TransportHalves> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.attempts.lock().unwrap().push(Instant::now());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(Outcome::Accept);
        self.active.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Outcome::Refuse => Err(TransportError::Io(io::ErrorKind::ConnectionRefused.into())),
            Outcome::Accept => {
                let (client, server) = tokio::io::duplex(4096);
                let _ = self.accepted.send(server);
                Ok(TransportHalves::from_stream(client))
            }
        }
    }
}

/// Input whose dial and buttons the test sets from outside.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedInput {
    state: Arc<Mutex<InputSample>>,
}

impl ScriptedInput {
    pub(crate) fn set_raw(&self, raw: u16) {
        self.state.lock().unwrap().raw_speed = raw;
    }

    pub(crate) fn press(&self, button: Button) {
        self.state.lock().unwrap().pressed.push(button);
    }
}

impl InputProvider for ScriptedInput {
    fn sample(&mut self) -> InputSample {
        let mut state = self.state.lock().unwrap();
        InputSample {
            pressed: std::mem::take(&mut state.pressed),
            raw_speed: state.raw_speed,
        }
    }
}

/// Sink that keeps every snapshot it is given.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingSink {
    seen: Arc<Mutex<Vec<StatusSnapshot>>>,
}

impl RecordingSink {
    pub(crate) fn snapshots(&self) -> Vec<StatusSnapshot> {
        self.seen.lock().unwrap().clone()
    }
}

impl StatusSink for RecordingSink {
    fn publish(&mut self, snapshot: &StatusSnapshot) {
        self.seen.lock().unwrap().push(snapshot.clone());
    }
}
