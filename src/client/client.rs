//! High-level throttle API.
//!
//! [`ThrottleClient`] owns the shared state and runs the six cooperative
//! tasks until shut down.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::config::{ConfigProvider, ThrottleConfig};
use super::context::{LinkStatus, ThrottleContext};
use super::tasks::{
    dispatch_task, heartbeat_task, input_task, monitor_task, receive_task, status_task,
};
use crate::control::StatusSnapshot;
use crate::core::{ConfigError, InputProvider, StatusSink};
use crate::transport::{Connector, TcpConnector};

/// A running throttle.
///
/// # Example
///
/// ```ignore
/// use rcp_throttle::client::{ThrottleClient, ThrottleConfig};
///
/// let config = ThrottleConfig::builder().host("rocrail.local").build()?;
/// let client = ThrottleClient::tcp(config);
///
/// // Stop from elsewhere with client.shutdown().
/// client.run(my_input, |status: &StatusSnapshot| show(status)).await;
/// ```
pub struct ThrottleClient<C: Connector = TcpConnector> {
    context: ThrottleContext,
    connector: C,
}

impl ThrottleClient<TcpConnector> {
    /// Create a client that connects over TCP.
    pub fn tcp(config: ThrottleConfig) -> Self {
        let connector = TcpConnector::new(config.connect_timeout);
        Self::new(config, connector)
    }
}

impl<C: Connector> ThrottleClient<C> {
    /// Create a client using `connector` to open transports.
    pub fn new(config: ThrottleConfig, connector: C) -> Self {
        Self {
            context: ThrottleContext::new(config),
            connector,
        }
    }

    /// Load and validate the configuration from `provider`.
    pub fn from_provider<P: ConfigProvider>(provider: &P, connector: C) -> Result<Self, ConfigError> {
        Ok(Self::new(provider.load()?, connector))
    }

    /// Active configuration.
    pub fn config(&self) -> &ThrottleConfig {
        &self.context.config
    }

    /// Watch the status snapshot.
    pub fn status(&self) -> watch::Receiver<StatusSnapshot> {
        self.context.subscribe_status()
    }

    /// Watch the link state.
    pub fn link(&self) -> watch::Receiver<LinkStatus> {
        self.context.subscribe_link()
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.context.cancel.clone()
    }

    /// Ask all tasks to stop.
    pub fn shutdown(&self) {
        self.context.cancel.cancel();
    }

    /// Run the throttle until shut down.
    ///
    /// On return the link is Disconnected, the outbound queue is empty and
    /// the transport is closed.
    pub async fn run<I, S>(&self, mut input: I, mut sink: S)
    where
        I: InputProvider,
        S: StatusSink,
    {
        let ctx = &self.context;
        tracing::info!(endpoint = %ctx.config.endpoint, "throttle starting");

        tokio::join!(
            monitor_task(ctx, &self.connector),
            dispatch_task(ctx),
            receive_task(ctx),
            input_task(ctx, &mut input),
            status_task(ctx, &mut sink),
            heartbeat_task(ctx),
        );

        ctx.close().await;
        let snapshot = ctx.snapshot().await;
        sink.publish(&snapshot);
        ctx.publish_status(snapshot);
        tracing::info!("throttle stopped");
    }
}
