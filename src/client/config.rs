//! Throttle configuration.

use std::time::Duration;

use crate::control::Calibration;
use crate::core::constants::{
    COMMAND_REPEAT_INTERVAL, DEFAULT_BACKOFF, DEFAULT_CALIBRATION_MAX, DEFAULT_CALIBRATION_MIN,
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_LOCO_ID, DEFAULT_OUTBOUND_CAPACITY,
    DEFAULT_RECEIVE_BUFFER, DEFAULT_ROSTER_LIMIT, DEFAULT_SMOOTHING_WINDOW, HEARTBEAT_INTERVAL,
    HEARTBEAT_TIMEOUT, INPUT_SAMPLE_INTERVAL, MIN_RECEIVE_BUFFER, SPEED_UPDATE_INTERVAL,
    STATUS_INTERVAL,
};
use crate::core::ConfigError;
use crate::transport::{BackoffSchedule, Endpoint};

/// Source of the configuration, read once at startup.
///
/// Persisted storage lives outside the engine; implement this for whatever
/// the device keeps its settings in.
pub trait ConfigProvider {
    /// Produce a validated configuration.
    fn load(&self) -> Result<ThrottleConfig, ConfigError>;
}

/// Throttle configuration.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Server to connect to.
    pub endpoint: Endpoint,

    /// Connect timeout.
    pub connect_timeout: Duration,

    /// Retry delays after a failed or lost connection.
    pub backoff: BackoffSchedule,

    /// Receive buffer capacity in bytes.
    pub receive_buffer_capacity: usize,

    /// Outbound FIFO depth. The oldest command is dropped when full.
    pub outbound_capacity: usize,

    /// Maximum roster entries.
    pub roster_limit: usize,

    /// Locomotive selected before the server roster arrives.
    pub default_loco_id: Option<String>,

    /// Raw dial range.
    pub calibration: Calibration,

    /// Dial readings averaged per sample.
    pub smoothing_window: usize,

    /// Input sampling interval.
    pub input_interval: Duration,

    /// Minimum spacing between speed submissions.
    pub speed_update_interval: Duration,

    /// Status projection interval.
    pub status_interval: Duration,

    /// Idle time before a heartbeat is sent.
    pub heartbeat_interval: Duration,

    /// How long a heartbeat may go unanswered before the link is dropped.
    pub heartbeat_timeout: Duration,

    /// Identical commands are re-sent after this long.
    pub command_repeat_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            backoff: BackoffSchedule::default(),
            receive_buffer_capacity: DEFAULT_RECEIVE_BUFFER,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            roster_limit: DEFAULT_ROSTER_LIMIT,
            default_loco_id: Some(DEFAULT_LOCO_ID.to_string()),
            calibration: Calibration::default(),
            smoothing_window: DEFAULT_SMOOTHING_WINDOW,
            input_interval: INPUT_SAMPLE_INTERVAL,
            speed_update_interval: SPEED_UPDATE_INTERVAL,
            status_interval: STATUS_INTERVAL,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            heartbeat_timeout: HEARTBEAT_TIMEOUT,
            command_repeat_interval: COMMAND_REPEAT_INTERVAL,
        }
    }
}

impl ThrottleConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> ThrottleConfigBuilder {
        ThrottleConfigBuilder::new()
    }

    /// Check the values a builder cannot enforce by construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.endpoint.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.receive_buffer_capacity < MIN_RECEIVE_BUFFER {
            return Err(ConfigError::BufferTooSmall {
                minimum: MIN_RECEIVE_BUFFER,
                actual: self.receive_buffer_capacity,
            });
        }
        if self.roster_limit == 0 {
            return Err(ConfigError::InvalidRosterLimit);
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }
        let intervals = [
            ("input interval", self.input_interval),
            ("status interval", self.status_interval),
            ("heartbeat interval", self.heartbeat_interval),
            ("heartbeat timeout", self.heartbeat_timeout),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::ZeroInterval(*name));
        }
        Ok(())
    }
}

impl ConfigProvider for ThrottleConfig {
    fn load(&self) -> Result<ThrottleConfig, ConfigError> {
        self.validate()?;
        Ok(self.clone())
    }
}

/// Builder for [`ThrottleConfig`].
#[derive(Debug)]
pub struct ThrottleConfigBuilder {
    config: ThrottleConfig,
    backoff: Vec<Duration>,
    calibration: (u16, u16),
}

impl ThrottleConfigBuilder {
    /// Create a builder with default values.
    pub fn new() -> Self {
        Self {
            config: ThrottleConfig::default(),
            backoff: DEFAULT_BACKOFF.to_vec(),
            calibration: (DEFAULT_CALIBRATION_MIN, DEFAULT_CALIBRATION_MAX),
        }
    }

    /// Set the server host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.endpoint.host = host.into();
        self
    }

    /// Set the server port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.endpoint.port = port;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the retry delays.
    pub fn backoff(mut self, delays: impl IntoIterator<Item = Duration>) -> Self {
        self.backoff = delays.into_iter().collect();
        self
    }

    /// Set the receive buffer capacity.
    pub fn receive_buffer_capacity(mut self, bytes: usize) -> Self {
        self.config.receive_buffer_capacity = bytes;
        self
    }

    /// Set the outbound FIFO depth.
    pub fn outbound_capacity(mut self, depth: usize) -> Self {
        self.config.outbound_capacity = depth;
        self
    }

    /// Set the roster size limit.
    pub fn roster_limit(mut self, limit: usize) -> Self {
        self.config.roster_limit = limit;
        self
    }

    /// Set or clear the fallback locomotive.
    pub fn default_loco_id(mut self, id: Option<String>) -> Self {
        self.config.default_loco_id = id;
        self
    }

    /// Set the raw dial range.
    pub fn calibration(mut self, min: u16, max: u16) -> Self {
        self.calibration = (min, max);
        self
    }

    /// Set the dial smoothing window.
    pub fn smoothing_window(mut self, samples: usize) -> Self {
        self.config.smoothing_window = samples;
        self
    }

    /// Set the input sampling interval.
    pub fn input_interval(mut self, interval: Duration) -> Self {
        self.config.input_interval = interval;
        self
    }

    /// Set the speed submission interval.
    pub fn speed_update_interval(mut self, interval: Duration) -> Self {
        self.config.speed_update_interval = interval;
        self
    }

    /// Set the status projection interval.
    pub fn status_interval(mut self, interval: Duration) -> Self {
        self.config.status_interval = interval;
        self
    }

    /// Set the idle time before a heartbeat.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Set how long a heartbeat may go unanswered.
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.config.heartbeat_timeout = timeout;
        self
    }

    /// Set the repeat interval for identical commands.
    pub fn command_repeat_interval(mut self, interval: Duration) -> Self {
        self.config.command_repeat_interval = interval;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<ThrottleConfig, ConfigError> {
        let mut config = self.config;
        config.backoff = BackoffSchedule::new(self.backoff).ok_or(ConfigError::EmptyBackoff)?;
        config.calibration = Calibration::new(self.calibration.0, self.calibration.1)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ThrottleConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::DEFAULT_PORT;

    #[test]
    fn test_defaults_are_valid() {
        let config = ThrottleConfig::builder().build().unwrap();
        assert_eq!(config.endpoint.port, DEFAULT_PORT);
        assert_eq!(config.default_loco_id.as_deref(), Some("BR103"));
        assert_eq!(config.backoff.delays().len(), 5);
        assert_eq!(config.calibration, Calibration::default());
    }

    #[test]
    fn test_builder_overrides() {
        let config = ThrottleConfig::builder()
            .host("rocrail.local")
            .port(8052)
            .backoff([Duration::from_millis(100)])
            .roster_limit(3)
            .calibration(0, 4095)
            .default_loco_id(None)
            .build()
            .unwrap();

        assert_eq!(config.endpoint, Endpoint::new("rocrail.local", 8052));
        assert_eq!(config.backoff.delay(7), Duration::from_millis(100));
        assert_eq!(config.roster_limit, 3);
        assert_eq!(config.calibration.max(), 4095);
        assert!(config.default_loco_id.is_none());
    }

    #[test]
    fn test_builder_rejects_invalid_values() {
        let err = |b: ThrottleConfigBuilder| b.build().unwrap_err();

        assert_eq!(err(ThrottleConfig::builder().host(" ")), ConfigError::EmptyHost);
        assert_eq!(err(ThrottleConfig::builder().port(0)), ConfigError::InvalidPort);
        assert_eq!(err(ThrottleConfig::builder().backoff([])), ConfigError::EmptyBackoff);
        assert_eq!(err(ThrottleConfig::builder().roster_limit(0)), ConfigError::InvalidRosterLimit);
        assert_eq!(
            err(ThrottleConfig::builder().outbound_capacity(0)),
            ConfigError::InvalidQueueCapacity
        );
        assert_eq!(
            err(ThrottleConfig::builder().input_interval(Duration::ZERO)),
            ConfigError::ZeroInterval("input interval")
        );
        assert_eq!(
            err(ThrottleConfig::builder().heartbeat_timeout(Duration::ZERO)),
            ConfigError::ZeroInterval("heartbeat timeout")
        );
        assert_eq!(
            err(ThrottleConfig::builder().receive_buffer_capacity(512)),
            ConfigError::BufferTooSmall {
                minimum: MIN_RECEIVE_BUFFER,
                actual: 512
            }
        );
        assert_eq!(
            err(ThrottleConfig::builder().calibration(2000, 1000)),
            ConfigError::InvalidCalibration {
                min: 2000,
                max: 1000
            }
        );
    }

    #[test]
    fn test_config_provider_validates() {
        let mut config = ThrottleConfig::default();
        assert!(config.load().is_ok());

        config.receive_buffer_capacity = 16;
        assert!(matches!(config.load(), Err(ConfigError::BufferTooSmall { .. })));
    }
}
