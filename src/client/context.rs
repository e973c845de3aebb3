//! State shared by the throttle tasks.
//!
//! Lock order is `link` first, then any of the others. Nothing here holds a
//! lock across a socket operation.

use std::collections::VecDeque;

use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::config::ThrottleConfig;
use crate::control::{CommandGate, RosterStore, StatusSnapshot};
use crate::core::constants::{LIGHT_FUNCTION, SOUND_FUNCTION};
use crate::core::Button;
use crate::transport::{
    drain_elements, BoxReader, BoxWriter, Command, ConnectionStateMachine, DrainReport, LinkEvent,
    LinkState, ReceiveBuffer, ReconnectContext, ReconnectPolicy, TransportHalves, Transition,
};

/// Link state as seen by the tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatus {
    /// Lifecycle state.
    pub state: LinkState,
    /// Session number. Changes on every new connection.
    pub session: u64,
}

#[derive(Debug, Clone, Copy)]
struct ControlState {
    forward: bool,
    light: bool,
    sound: bool,
    live_speed: u8,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            forward: true,
            light: false,
            sound: false,
            live_speed: 0,
        }
    }
}

impl ControlState {
    fn toggle_function(&mut self, index: u8) -> bool {
        let flag = if index == LIGHT_FUNCTION {
            &mut self.light
        } else {
            &mut self.sound
        };
        *flag = !*flag;
        *flag
    }
}

pub(crate) struct ThrottleContext {
    pub(crate) config: ThrottleConfig,
    pub(crate) cancel: CancellationToken,
    link: Mutex<ConnectionStateMachine>,
    link_tx: watch::Sender<LinkStatus>,
    outbound: Mutex<VecDeque<Command>>,
    outbound_ready: Notify,
    roster: RwLock<RosterStore>,
    gate: Mutex<CommandGate>,
    controls: Mutex<ControlState>,
    reader: Mutex<Option<(u64, BoxReader)>>,
    writer: Mutex<Option<(u64, BoxWriter)>>,
    last_activity: Mutex<Instant>,
    last_received: Mutex<Instant>,
    status_tx: watch::Sender<StatusSnapshot>,
}

impl ThrottleContext {
    pub(crate) fn new(config: ThrottleConfig) -> Self {
        let policy = ReconnectPolicy::new(config.backoff.clone());
        let roster = RosterStore::new(config.roster_limit, config.default_loco_id.as_deref());
        let gate = CommandGate::new(config.command_repeat_interval);
        let controls = ControlState::default();
        let initial = StatusSnapshot::project(LinkState::Disconnected, &roster, gate.state(), controls.forward);
        let outbound = VecDeque::with_capacity(config.outbound_capacity);

        Self {
            config,
            cancel: CancellationToken::new(),
            link: Mutex::new(ConnectionStateMachine::new(policy)),
            link_tx: watch::Sender::new(LinkStatus::default()),
            outbound: Mutex::new(outbound),
            outbound_ready: Notify::new(),
            roster: RwLock::new(roster),
            gate: Mutex::new(gate),
            controls: Mutex::new(controls),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
            last_received: Mutex::new(Instant::now()),
            status_tx: watch::Sender::new(initial),
        }
    }

    // ---------------------------------------------------------------------
    // Link
    // ---------------------------------------------------------------------

    pub(crate) fn link_status(&self) -> LinkStatus {
        *self.link_tx.borrow()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.link_status().state == LinkState::Connected
    }

    pub(crate) fn subscribe_link(&self) -> watch::Receiver<LinkStatus> {
        self.link_tx.subscribe()
    }

    pub(crate) async fn reconnect_context(&self) -> ReconnectContext {
        self.link.lock().await.reconnect()
    }

    pub(crate) async fn apply(&self, event: LinkEvent) -> Option<Transition> {
        self.apply_with(event, None).await
    }

    /// Feed `event` to the state machine and carry out the side effects of
    /// the resulting transition. `halves` are installed only when the event
    /// enters Connected; otherwise they are dropped, closing the stream.
    pub(crate) async fn apply_with(
        &self,
        event: LinkEvent,
        halves: Option<TransportHalves>,
    ) -> Option<Transition> {
        let mut link = self.link.lock().await;
        let transition = link.handle(event)?;
        let status = LinkStatus {
            state: transition.to,
            session: transition.session,
        };

        if transition.entered_connected() {
            if let Some(TransportHalves { reader, writer }) = halves {
                *self.reader.lock().await = Some((transition.session, reader));
                *self.writer.lock().await = Some((transition.session, writer));
            }
            self.roster.write().await.begin_refresh();
            {
                let mut queue = self.outbound.lock().await;
                queue.clear();
                queue.push_back(Command::RosterQuery);
            }
            let now = Instant::now();
            *self.last_activity.lock().await = now;
            *self.last_received.lock().await = now;
            self.link_tx.send_replace(status);
            self.outbound_ready.notify_one();
        } else if transition.left_connected() {
            self.link_tx.send_replace(status);
            self.outbound.lock().await.clear();
            self.gate.lock().await.on_link_lost();
            self.roster.write().await.abort_refresh();
            *self.reader.lock().await = None;
            *self.writer.lock().await = None;
        } else {
            self.link_tx.send_replace(status);
        }
        drop(link);

        tracing::info!(
            from = %transition.from,
            to = %transition.to,
            session = transition.session,
            "link state changed"
        );
        Some(transition)
    }

    pub(crate) async fn take_reader(&self, session: u64) -> Option<BoxReader> {
        let mut slot = self.reader.lock().await;
        match slot.take() {
            Some((owner, reader)) if owner == session => Some(reader),
            other => {
                *slot = other;
                None
            }
        }
    }

    pub(crate) async fn take_writer(&self, session: u64) -> Option<BoxWriter> {
        let mut slot = self.writer.lock().await;
        match slot.take() {
            Some((owner, writer)) if owner == session => Some(writer),
            other => {
                *slot = other;
                None
            }
        }
    }

    pub(crate) async fn touch(&self) {
        *self.last_activity.lock().await = Instant::now();
    }

    pub(crate) async fn last_activity(&self) -> Instant {
        *self.last_activity.lock().await
    }

    /// Record bytes arriving from the server.
    pub(crate) async fn mark_received(&self) {
        let now = Instant::now();
        *self.last_received.lock().await = now;
        *self.last_activity.lock().await = now;
    }

    pub(crate) async fn last_received(&self) -> Instant {
        *self.last_received.lock().await
    }

    /// Bring the link down and drop anything still queued or installed.
    pub(crate) async fn close(&self) {
        self.apply(LinkEvent::Shutdown).await;
        self.outbound.lock().await.clear();
        *self.reader.lock().await = None;
        *self.writer.lock().await = None;
    }

    // ---------------------------------------------------------------------
    // Outbound queue
    // ---------------------------------------------------------------------

    /// Queue a command for the dispatch task. Commands are dropped while the
    /// link is not Connected; when the queue is full the oldest goes.
    pub(crate) async fn enqueue(&self, command: Command) -> bool {
        let mut queue = self.outbound.lock().await;
        if !self.is_connected() {
            tracing::trace!(?command, "link down, command dropped");
            return false;
        }
        if queue.len() >= self.config.outbound_capacity {
            if let Some(oldest) = queue.pop_front() {
                tracing::warn!(dropped = ?oldest, "outbound queue full");
            }
        }
        queue.push_back(command);
        drop(queue);
        self.outbound_ready.notify_one();
        true
    }

    #[cfg(test)]
    pub(crate) async fn queued(&self) -> Vec<Command> {
        self.outbound.lock().await.iter().cloned().collect()
    }

    /// Wait for the next queued command.
    pub(crate) async fn next_outbound(&self) -> Command {
        loop {
            if let Some(command) = self.outbound.lock().await.pop_front() {
                return command;
            }
            self.outbound_ready.notified().await;
        }
    }

    // ---------------------------------------------------------------------
    // Controls
    // ---------------------------------------------------------------------

    /// Record the latest calibrated dial value.
    pub(crate) async fn observe_input(&self, live: u8) {
        self.controls.lock().await.live_speed = live;
        self.gate.lock().await.observe(live);
    }

    /// Pass a command through the gate and queue it.
    pub(crate) async fn submit(&self, command: Command) -> bool {
        if !self.is_connected() {
            return false;
        }
        let live = self.controls.lock().await.live_speed;
        let now = Instant::now().into_std();
        let filtered = self.gate.lock().await.filter(command, live, now);
        match filtered {
            Some(command) => self.enqueue(command).await,
            None => false,
        }
    }

    /// Speed command for the selected locomotive at the live dial value.
    pub(crate) async fn speed_command(&self) -> Option<Command> {
        let id = self.roster.read().await.selected_id()?.to_string();
        let controls = *self.controls.lock().await;
        Some(Command::speed(id, controls.live_speed, controls.forward))
    }

    pub(crate) async fn press(&self, button: Button) {
        tracing::debug!(?button, "button pressed");
        match button {
            Button::NextLoco => self.switch_loco(1).await,
            Button::PreviousLoco => self.switch_loco(-1).await,
            Button::Direction => {
                {
                    let mut controls = self.controls.lock().await;
                    controls.forward = !controls.forward;
                }
                self.stop_selected().await;
            }
            Button::EmergencyStop => self.stop_selected().await,
            Button::Light => self.toggle_function(LIGHT_FUNCTION).await,
            Button::Sound => self.toggle_function(SOUND_FUNCTION).await,
        }
    }

    async fn switch_loco(&self, delta: isize) {
        let switched = {
            let mut roster = self.roster.write().await;
            let before = roster.selected_id().map(str::to_string);
            roster.advance(delta);
            roster.selected_id() != before.as_deref()
        };
        if switched {
            self.stop_selected().await;
        }
    }

    async fn stop_selected(&self) {
        self.gate.lock().await.arm();
        let Some(id) = self.roster.read().await.selected_id().map(str::to_string) else {
            return;
        };
        let forward = self.controls.lock().await.forward;
        self.submit(Command::speed(id, 0, forward)).await;
    }

    async fn toggle_function(&self, index: u8) {
        if !self.is_connected() {
            return;
        }
        let Some(id) = self.roster.read().await.selected_id().map(str::to_string) else {
            return;
        };
        let enabled = self.controls.lock().await.toggle_function(index);
        self.submit(Command::function(id, index, enabled)).await;
    }

    // ---------------------------------------------------------------------
    // Inbound
    // ---------------------------------------------------------------------

    /// Route every complete element in `buffer` into the roster.
    ///
    /// A resync in the middle of a list loses part of it, so the list is
    /// requested again.
    pub(crate) async fn ingest(&self, buffer: &mut ReceiveBuffer) -> DrainReport {
        let mut roster = self.roster.write().await;
        let report = drain_elements(buffer, |element| {
            if element.is_header() {
                return;
            }
            if let Some(change) = roster.ingest(&element) {
                tracing::debug!(?change, "roster changed");
            }
        });

        let requery = report.resynchronized && roster.is_loading();
        if requery {
            roster.begin_refresh();
        }
        drop(roster);

        if requery {
            tracing::warn!("roster list cut by resync, requesting again");
            self.enqueue(Command::RosterQuery).await;
        }
        report
    }

    // ---------------------------------------------------------------------
    // Status
    // ---------------------------------------------------------------------

    pub(crate) async fn snapshot(&self) -> StatusSnapshot {
        let link = self.link_status().state;
        let gate = self.gate.lock().await.state();
        let forward = self.controls.lock().await.forward;
        let roster = self.roster.read().await;
        StatusSnapshot::project(link, &roster, gate, forward)
    }

    pub(crate) fn publish_status(&self, snapshot: StatusSnapshot) {
        self.status_tx.send_replace(snapshot);
    }

    pub(crate) fn subscribe_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::DEFAULT_LOCO_ID;

    async fn connected() -> ThrottleContext {
        let ctx = ThrottleContext::new(ThrottleConfig::default());
        ctx.apply(LinkEvent::ConnectRequested).await.unwrap();
        ctx.apply(LinkEvent::ConnectSucceeded).await.unwrap();
        ctx
    }

    async fn drain(ctx: &ThrottleContext) -> Vec<Command> {
        let mut out = Vec::new();
        while let Some(command) = ctx.outbound.lock().await.pop_front() {
            out.push(command);
        }
        out
    }

    #[tokio::test]
    async fn test_enqueue_requires_connected_link() {
        let ctx = ThrottleContext::new(ThrottleConfig::default());
        assert!(!ctx.enqueue(Command::Heartbeat).await);
        assert!(!ctx.submit(Command::speed("BR103", 10, true)).await);
        assert!(drain(&ctx).await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_queues_roster_query_first() {
        let ctx = connected().await;
        assert!(ctx.enqueue(Command::Heartbeat).await);
        assert_eq!(drain(&ctx).await, vec![Command::RosterQuery, Command::Heartbeat]);
        assert!(ctx.roster.read().await.is_refreshing());
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest() {
        let config = ThrottleConfig::builder().outbound_capacity(2).build().unwrap();
        let ctx = ThrottleContext::new(config);
        ctx.apply(LinkEvent::ConnectRequested).await.unwrap();
        ctx.apply(LinkEvent::ConnectSucceeded).await.unwrap();

        ctx.enqueue(Command::speed("BR103", 1, true)).await;
        ctx.enqueue(Command::speed("BR103", 2, true)).await;
        assert_eq!(
            drain(&ctx).await,
            vec![Command::speed("BR103", 1, true), Command::speed("BR103", 2, true)]
        );
    }

    #[tokio::test]
    async fn test_link_loss_clears_queue_and_arms_gate() {
        let ctx = connected().await;
        ctx.enqueue(Command::Heartbeat).await;

        let t = ctx.apply(LinkEvent::ReceiveFailed { session: 1 }).await.unwrap();
        assert!(t.left_connected());
        assert!(drain(&ctx).await.is_empty());
        assert!(ctx.gate.lock().await.is_armed());
        assert_eq!(ctx.link_status().state, LinkState::Recovering);
    }

    #[tokio::test]
    async fn test_halves_bound_to_session() {
        let ctx = ThrottleContext::new(ThrottleConfig::default());
        ctx.apply(LinkEvent::ConnectRequested).await.unwrap();
        let (client, _server) = tokio::io::duplex(64);
        ctx.apply_with(LinkEvent::ConnectSucceeded, Some(TransportHalves::from_stream(client)))
            .await
            .unwrap();

        assert!(ctx.take_writer(2).await.is_none());
        assert!(ctx.take_writer(1).await.is_some());
        assert!(ctx.take_writer(1).await.is_none());
        assert!(ctx.take_reader(1).await.is_some());
    }

    #[tokio::test]
    async fn test_emergency_stop_arms_and_sends_zero() {
        let ctx = connected().await;
        drain(&ctx).await;
        ctx.observe_input(70).await;

        ctx.press(Button::EmergencyStop).await;
        assert_eq!(drain(&ctx).await, vec![Command::speed(DEFAULT_LOCO_ID, 0, true)]);
        assert!(ctx.gate.lock().await.is_armed());

        // Dial still at 70: speed stays forced to zero and is a repeat.
        let command = ctx.speed_command().await.unwrap();
        assert!(!ctx.submit(command).await);
    }

    #[tokio::test]
    async fn test_direction_toggle_sends_zero_in_new_direction() {
        let ctx = connected().await;
        drain(&ctx).await;

        ctx.press(Button::Direction).await;
        assert_eq!(drain(&ctx).await, vec![Command::speed(DEFAULT_LOCO_ID, 0, false)]);
        assert!(!ctx.snapshot().await.forward);
    }

    #[tokio::test]
    async fn test_function_buttons_toggle() {
        let ctx = connected().await;
        drain(&ctx).await;

        ctx.press(Button::Light).await;
        ctx.press(Button::Sound).await;
        ctx.press(Button::Light).await;
        assert_eq!(
            drain(&ctx).await,
            vec![
                Command::function(DEFAULT_LOCO_ID, 0, true),
                Command::function(DEFAULT_LOCO_ID, 1, true),
                Command::function(DEFAULT_LOCO_ID, 0, false),
            ]
        );
    }

    #[tokio::test]
    async fn test_ingest_skips_headers_and_fills_roster() {
        let ctx = connected().await;
        let mut buffer = ReceiveBuffer::new(4096);
        buffer
            .append(b"<xmlh><xml size=\"40\"/></xmlh><lclist><lc id=\"A\"/><lc id=\"B\"/></lclist>")
            .unwrap();

        let report = ctx.ingest(&mut buffer).await;
        assert_eq!(report.malformed, 0);
        let snapshot = ctx.snapshot().await;
        assert_eq!(snapshot.roster_size, 2);
        assert_eq!(snapshot.selected_id.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn test_next_loco_wraps_and_stops_new_selection() {
        let ctx = connected().await;
        let mut buffer = ReceiveBuffer::new(4096);
        buffer.append(b"<lclist><lc id=\"A\"/><lc id=\"B\"/></lclist>").unwrap();
        ctx.ingest(&mut buffer).await;
        drain(&ctx).await;

        ctx.press(Button::PreviousLoco).await;
        assert_eq!(ctx.snapshot().await.selected_id.as_deref(), Some("B"));
        assert_eq!(drain(&ctx).await, vec![Command::speed("B", 0, true)]);
    }

    #[tokio::test]
    async fn test_switch_on_single_entry_roster_is_ignored() {
        let ctx = connected().await;
        drain(&ctx).await;

        ctx.press(Button::NextLoco).await;
        ctx.press(Button::PreviousLoco).await;
        assert!(drain(&ctx).await.is_empty());
        assert!(!ctx.gate.lock().await.is_armed());
        assert_eq!(ctx.snapshot().await.selected_id.as_deref(), Some(DEFAULT_LOCO_ID));
    }

    #[tokio::test]
    async fn test_resync_during_list_requests_roster_again() {
        let ctx = connected().await;
        drain(&ctx).await;
        let mut buffer = ReceiveBuffer::new(64);
        buffer.append(b"<lclist><lc id=\"A\"/>").unwrap();
        ctx.ingest(&mut buffer).await;
        assert!(ctx.roster.read().await.is_loading());

        // An unterminated tag with no later `<` fills the buffer.
        let fragment = format!("<lc name=\"{}", "x".repeat(buffer.available() - 10));
        buffer.append(fragment.as_bytes()).unwrap();
        let report = ctx.ingest(&mut buffer).await;

        assert!(report.resynchronized);
        assert_eq!(ctx.queued().await, vec![Command::RosterQuery]);
        let roster = ctx.roster.read().await;
        assert!(!roster.is_loading());
        assert!(roster.is_refreshing());
    }
}
