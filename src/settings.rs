//! Static device settings
//!
//! Loaded once at start from an optional TOML file; every field has the
//! field-deployment default. Command-line flags override the file.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use uplink_shared::limits;

use crate::metadata::MetadataSettings;
use crate::modem::ApnSettings;
use crate::transport::{BrokerEndpoint, DatagramEndpoint};

/// Cellular telemetry uplink daemon.
#[derive(Parser, Debug, Default)]
#[command(name = "uplink-device", about = "Cellular sensor telemetry uplink")]
pub struct Args {
    /// TOML settings file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Modem serial device.
    #[arg(long)]
    pub port: Option<String>,

    /// Modem serial baud rate.
    #[arg(long)]
    pub baud: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub port: String,
    pub baud: u32,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".into(),
            baud: 115_200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// Sample interval until the metadata service says otherwise
    pub interval_s: u64,
    pub config_refresh_s: u64,
    /// Pause before a cold start after an unrecoverable failure
    pub restart_delay_s: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            interval_s: limits::DEFAULT_SAMPLE_INTERVAL.as_secs(),
            config_refresh_s: 60,
            restart_delay_s: 30,
        }
    }
}

impl ScheduleSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_s).max(limits::MIN_SAMPLE_INTERVAL)
    }

    pub fn config_refresh(&self) -> Duration {
        Duration::from_secs(self.config_refresh_s)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_s)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Identity fallback when neither IMSI nor IMEI is known
    pub device_name: String,
    pub modem: SerialSettings,
    pub apn: ApnSettings,
    pub datagram: DatagramEndpoint,
    pub broker: BrokerEndpoint,
    pub metadata: MetadataSettings,
    pub schedule: ScheduleSettings,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            device_name: "uplink-device".into(),
            modem: SerialSettings::default(),
            apn: ApnSettings::default(),
            datagram: DatagramEndpoint::default(),
            broker: BrokerEndpoint::default(),
            metadata: MetadataSettings::default(),
            schedule: ScheduleSettings::default(),
        }
    }
}

impl DeviceSettings {
    pub fn from_toml(input: &str) -> Result<Self> {
        toml::from_str(input).context("Invalid settings TOML")
    }

    pub fn load(args: &Args) -> Result<Self> {
        let mut settings = match &args.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Reading {}", path.display()))?;
                Self::from_toml(&text).with_context(|| format!("Parsing {}", path.display()))?
            }
            None => Self::default(),
        };

        if let Some(port) = &args.port {
            settings.modem.port = port.clone();
        }
        if let Some(baud) = args.baud {
            settings.modem.baud = baud;
        }
        Ok(settings)
    }
}
