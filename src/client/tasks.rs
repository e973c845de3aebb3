//! The six cooperative throttle tasks.
//!
//! Every task borrows the shared [`ThrottleContext`] and returns when the
//! cancellation token fires. Cancellation is always checked first.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::{interval, sleep, sleep_until, Instant, MissedTickBehavior};

use super::context::{LinkStatus, ThrottleContext};
use crate::control::{SmoothedDial, StatusProjector};
use crate::core::constants::READ_CHUNK_SIZE;
use crate::core::{InputProvider, StatusSink};
use crate::transport::{
    write_frame, Command, Connector, LinkEvent, LinkState, ReceiveBuffer, TransportError,
};

/// Wait until the link is Connected. Returns the session, or `None` on
/// cancellation.
async fn wait_connected(
    ctx: &ThrottleContext,
    link_rx: &mut watch::Receiver<LinkStatus>,
) -> Option<u64> {
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => None,
        status = link_rx.wait_for(|s| s.state == LinkState::Connected) => {
            status.ok().map(|s| s.session)
        }
    }
}

/// Resolve once `session` is no longer the live Connected session.
async fn session_ended(link_rx: &mut watch::Receiver<LinkStatus>, session: u64) {
    let _ = link_rx
        .wait_for(|s| s.state != LinkState::Connected || s.session != session)
        .await;
}

// =============================================================================
// CONNECTION MONITOR
// =============================================================================

/// Bring the link up and keep it up.
///
/// Any number of monitors may run; the state machine lets exactly one of
/// them own each attempt.
pub(crate) async fn monitor_task<C: Connector>(ctx: &ThrottleContext, connector: &C) {
    let mut link_rx = ctx.subscribe_link();
    loop {
        let state = link_rx.borrow_and_update().state;
        let event = match state {
            LinkState::Disconnected => Some(LinkEvent::ConnectRequested),
            LinkState::Recovering => {
                let reconnect = ctx.reconnect_context().await;
                let delay = reconnect.next_delay;
                tracing::info!(
                    attempt = reconnect.attempt_count + 1,
                    delay_ms = delay.as_millis() as u64,
                    "reconnect scheduled"
                );
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => return,
                    _ = sleep(delay) => Some(LinkEvent::RetryDue),
                }
            }
            LinkState::Connecting | LinkState::Connected => None,
        };

        if let Some(event) = event {
            if let Some(transition) = ctx.apply(event).await {
                if transition.to == LinkState::Connecting {
                    connect_once(ctx, connector).await;
                }
                continue;
            }
        }

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return,
            changed = link_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

async fn connect_once<C: Connector>(ctx: &ThrottleContext, connector: &C) {
    let endpoint = &ctx.config.endpoint;
    tracing::info!(%endpoint, "connecting");

    let result = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return,
        result = connector.connect(endpoint) => result,
    };

    match result {
        Ok(halves) => {
            ctx.apply_with(LinkEvent::ConnectSucceeded, Some(halves)).await;
        }
        Err(e) => {
            tracing::warn!(%endpoint, error = %e, "connect failed");
            ctx.apply(LinkEvent::ConnectFailed).await;
        }
    }
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Drain the outbound FIFO onto the socket, one frame at a time.
pub(crate) async fn dispatch_task(ctx: &ThrottleContext) {
    let mut link_rx = ctx.subscribe_link();
    while let Some(session) = wait_connected(ctx, &mut link_rx).await {
        let Some(mut writer) = ctx.take_writer(session).await else {
            session_ended(&mut link_rx, session).await;
            continue;
        };
        tracing::debug!(session, "dispatch attached");

        loop {
            let command = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    let _ = writer.shutdown().await;
                    return;
                }
                _ = session_ended(&mut link_rx, session) => break,
                command = ctx.next_outbound() => command,
            };

            let frame = command.encode();
            let written = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return,
                written = write_frame(&mut writer, &frame) => written,
            };

            match written {
                Ok(()) => {
                    tracing::trace!(?command, bytes = frame.len(), "frame sent");
                    ctx.touch().await;
                    ctx.apply(LinkEvent::SendSucceeded { session }).await;
                }
                Err(e) => {
                    tracing::warn!(session, error = %e, "send failed");
                    ctx.apply(LinkEvent::SendFailed { session }).await;
                    break;
                }
            }
        }
    }
}

// =============================================================================
// RECEIVE
// =============================================================================

/// Read from the socket into the receive buffer and route what decodes.
pub(crate) async fn receive_task(ctx: &ThrottleContext) {
    let mut link_rx = ctx.subscribe_link();
    let mut buffer = ReceiveBuffer::new(ctx.config.receive_buffer_capacity);
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    while let Some(session) = wait_connected(ctx, &mut link_rx).await {
        buffer.clear();
        let Some(mut reader) = ctx.take_reader(session).await else {
            session_ended(&mut link_rx, session).await;
            continue;
        };
        tracing::debug!(session, "receive attached");

        loop {
            let read = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return,
                _ = session_ended(&mut link_rx, session) => break,
                read = reader.read(&mut chunk) => read,
            };

            let err = match read {
                Ok(0) => TransportError::ConnectionClosed,
                Ok(n) => {
                    ctx.mark_received().await;
                    ctx.apply(LinkEvent::ReceiveSucceeded { session }).await;
                    // Decoding between fills makes room; a fragment that
                    // never closes is cut by the overflow policy.
                    let mut rest = &chunk[..n];
                    while !rest.is_empty() {
                        let taken = buffer.fill(rest);
                        rest = &rest[taken..];
                        ctx.ingest(&mut buffer).await;
                    }
                    continue;
                }
                Err(e) => TransportError::from(e),
            };

            if err.is_peer_gone() {
                tracing::info!(session, error = %err, "server closed the connection");
            } else {
                tracing::warn!(session, error = %err, "receive failed");
            }
            ctx.apply(LinkEvent::ReceiveFailed { session }).await;
            break;
        }
    }
}

// =============================================================================
// INPUT
// =============================================================================

/// Sample the controls, handle button presses and submit speed updates.
pub(crate) async fn input_task<I: InputProvider>(ctx: &ThrottleContext, input: &mut I) {
    let mut dial = SmoothedDial::new(ctx.config.calibration, ctx.config.smoothing_window);
    let mut ticker = interval(ctx.config.input_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut next_speed = Instant::now();

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let sample = input.sample();
        let live = dial.push(sample.raw_speed);
        ctx.observe_input(live).await;

        for button in sample.pressed {
            ctx.press(button).await;
        }

        let now = Instant::now();
        if now >= next_speed {
            next_speed = now + ctx.config.speed_update_interval;
            if let Some(command) = ctx.speed_command().await {
                ctx.submit(command).await;
            }
        }
    }
}

// =============================================================================
// STATUS
// =============================================================================

/// Project state for the display whenever it changes.
pub(crate) async fn status_task<S: StatusSink>(ctx: &ThrottleContext, sink: &mut S) {
    let mut projector = StatusProjector::new();
    let mut ticker = interval(ctx.config.status_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut link_rx = ctx.subscribe_link();

    loop {
        let snapshot = ctx.snapshot().await;
        if let Some(changed) = projector.update(snapshot) {
            sink.publish(changed);
            ctx.publish_status(changed.clone());
        }

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return,
            _ = ticker.tick() => {}
            changed = link_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

// =============================================================================
// HEARTBEAT
// =============================================================================

/// Keep an idle link exercised and drop it when the server stops
/// answering.
///
/// Anything received within `heartbeat_timeout` of the heartbeat counts as
/// the reply.
pub(crate) async fn heartbeat_task(ctx: &ThrottleContext) {
    let idle = ctx.config.heartbeat_interval;
    let reply_within = ctx.config.heartbeat_timeout;
    loop {
        let deadline = ctx.last_activity().await + idle;
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return,
            _ = sleep_until(deadline) => {}
        }

        if ctx.last_activity().await + idle > Instant::now() {
            continue;
        }
        ctx.touch().await;

        let link = ctx.link_status();
        if link.state != LinkState::Connected {
            continue;
        }
        let sent = Instant::now();
        tracing::debug!(session = link.session, "link idle, sending heartbeat");
        ctx.enqueue(Command::Heartbeat).await;

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return,
            _ = sleep(reply_within) => {}
        }
        if ctx.last_received().await < sent && ctx.link_status() == link {
            tracing::warn!(
                session = link.session,
                timeout_ms = reply_within.as_millis() as u64,
                "heartbeat unanswered"
            );
            ctx.apply(LinkEvent::ReceiveFailed {
                session: link.session,
            })
            .await;
        }
    }
}
