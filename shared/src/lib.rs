//! Uplink Shared Types
//!
//! This crate provides the telemetry frame codec, retry policy, remote
//! configuration model and link-state machine shared between the field
//! device and the ingest server.

pub mod codec;
pub mod remote_config;
pub mod retry;
pub mod state_machine;

pub use codec::{TelemetryFrame, Validity};
pub use remote_config::{
    ConfigError, Qos, RemoteConfig, TransportKind, TransportSelection, UserData,
};
pub use retry::RetryPolicy;
pub use state_machine::{LinkEvent, LinkState};

/// Fixed thresholds and timeouts for the uplink
pub mod limits {
    use std::time::Duration;

    /// Consecutive send failures that trigger a modem-level reset
    pub const FAILURE_THRESHOLD: u32 = 3;

    /// Silence after the last successful send that triggers a reset
    pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(5 * 60);

    /// Attempts to open the datagram socket before giving up
    pub const SOCKET_OPEN_ATTEMPTS: u32 = 3;

    /// Registration polls during cold start and hard reset
    pub const REGISTRATION_ATTEMPTS: u32 = 5;

    /// Registration polls after a soft reset (extended)
    pub const SOFT_RESET_REGISTRATION_ATTEMPTS: u32 = 6;

    /// Activation attempts inside a data-context repair
    pub const DATA_CONTEXT_ATTEMPTS: u32 = 3;

    /// Session connect attempts for the publish transport
    pub const PUBLISH_CONNECT_ATTEMPTS: u32 = 2;

    /// Liveness probes before the modem is declared unresponsive
    pub const LIVENESS_PROBES: u32 = 10;

    /// Shortest accepted sample interval
    pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

    /// Sample interval used until a remote config says otherwise
    pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

    /// Maximum topic length in bytes
    pub const MAX_TOPIC_LEN: usize = 256;

    /// Settle time after a modem reboot
    pub const HARD_RESET_SETTLE: Duration = Duration::from_secs(10);
}

/// One acquisition from the sensor collaborators.
///
/// Every field is independently absent when the sensor that provides it
/// failed to produce a measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Reading {
    /// CO2 concentration in ppm
    pub co2: Option<f32>,
    /// Temperature in degrees Celsius
    pub temperature: Option<f32>,
    /// Relative humidity in percent
    pub humidity: Option<f32>,
    /// Wind (air) speed in m/s
    pub wind_speed: Option<f32>,
}

impl Reading {
    /// Fill absent fields from `other`, keeping fields already present
    pub fn merge(&mut self, other: Reading) {
        self.co2 = self.co2.or(other.co2);
        self.temperature = self.temperature.or(other.temperature);
        self.humidity = self.humidity.or(other.humidity);
        self.wind_speed = self.wind_speed.or(other.wind_speed);
    }

    /// True when no sensor produced anything
    pub fn is_empty(&self) -> bool {
        self.co2.is_none()
            && self.temperature.is_none()
            && self.humidity.is_none()
            && self.wind_speed.is_none()
    }
}
