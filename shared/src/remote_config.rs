//! Remote configuration served by the metadata service
//!
//! The `/v1/userdata` record is parsed into [`UserData`] and then validated
//! against the currently active [`RemoteConfig`]. A record that fails
//! validation never replaces the active configuration.

use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::limits;

/// Reasons a fetched configuration is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Userdata is not a valid record: {0}")]
    Malformed(String),

    #[error("Topic is empty")]
    EmptyTopic,

    #[error("Topic too long: {0} bytes (max: {max})", max = limits::MAX_TOPIC_LEN)]
    TopicTooLong(usize),

    #[error("Topic contains non-printable byte 0x{0:02x}")]
    TopicNotPrintable(u8),

    #[error("Unsupported qos: {0}")]
    InvalidQos(i64),

    #[error("Sample interval too short: {0}s")]
    IntervalTooShort(u64),
}

/// Raw `/v1/userdata` record; every field is optional
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct UserData {
    pub interval_s: Option<u64>,
    pub mqtt: Option<bool>,
    pub topic: Option<String>,
    pub qos: Option<i64>,
}

impl UserData {
    /// Parse a userdata body. Unknown fields are ignored.
    pub fn from_json(body: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(body.trim()).map_err(|e| ConfigError::Malformed(e.to_string()))
    }
}

/// Delivery guarantee for published messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Qos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
}

impl Qos {
    pub fn level(self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
        }
    }
}

impl TryFrom<i64> for Qos {
    type Error = ConfigError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            other => Err(ConfigError::InvalidQos(other)),
        }
    }
}

/// Transport type, independent of its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Udp,
    Mqtt,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Udp => write!(f, "UDP"),
            TransportKind::Mqtt => write!(f, "MQTT"),
        }
    }
}

/// Selected transport with its validated parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSelection {
    Udp,
    Mqtt { topic: String, qos: Qos },
}

impl TransportSelection {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportSelection::Udp => TransportKind::Udp,
            TransportSelection::Mqtt { .. } => TransportKind::Mqtt,
        }
    }
}

/// Validated configuration in force on the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub sample_interval: Duration,
    pub transport: TransportSelection,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            sample_interval: limits::DEFAULT_SAMPLE_INTERVAL,
            transport: TransportSelection::Udp,
        }
    }
}

impl RemoteConfig {
    /// Validate `data` on top of `self`.
    ///
    /// An absent `interval_s` keeps the current interval, an absent `mqtt`
    /// selects UDP and an absent `qos` means 0.
    pub fn resolve(&self, data: &UserData) -> Result<RemoteConfig, ConfigError> {
        let sample_interval = match data.interval_s {
            Some(secs) => {
                let interval = Duration::from_secs(secs);
                if interval < limits::MIN_SAMPLE_INTERVAL {
                    return Err(ConfigError::IntervalTooShort(secs));
                }
                interval
            }
            None => self.sample_interval,
        };

        let transport = if data.mqtt.unwrap_or(false) {
            let topic = data.topic.clone().unwrap_or_default();
            validate_topic(&topic)?;
            let qos = Qos::try_from(data.qos.unwrap_or(0))?;
            TransportSelection::Mqtt { topic, qos }
        } else {
            TransportSelection::Udp
        };

        Ok(RemoteConfig {
            sample_interval,
            transport,
        })
    }
}

/// Topic must be 1..=256 bytes of printable ASCII (32..=126)
pub fn validate_topic(topic: &str) -> Result<(), ConfigError> {
    if topic.is_empty() {
        return Err(ConfigError::EmptyTopic);
    }
    if topic.len() > limits::MAX_TOPIC_LEN {
        return Err(ConfigError::TopicTooLong(topic.len()));
    }
    if let Some(&b) = topic.as_bytes().iter().find(|b| !(32..=126).contains(*b)) {
        return Err(ConfigError::TopicNotPrintable(b));
    }
    Ok(())
}
