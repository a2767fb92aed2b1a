//! Display collaborator

use std::fmt;
use std::time::Duration;
use tracing::info;
use uplink_shared::{LinkState, TelemetryFrame, TransportKind};

use crate::modem::SignalQuality;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Up,
    /// Recent sends failed or the modem is not online
    Degraded,
    /// Sends skipped under a rejected configuration
    Suspended,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Up => write!(f, "up"),
            LinkStatus::Degraded => write!(f, "degraded"),
            LinkStatus::Suspended => write!(f, "suspended"),
        }
    }
}

/// Everything the display shows after a cycle
#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySnapshot {
    pub frame: TelemetryFrame,
    pub transport: TransportKind,
    pub link_state: LinkState,
    pub link_status: LinkStatus,
    pub signal: Option<SignalQuality>,
    pub failures: u32,
    pub interval: Duration,
    pub imsi: Option<String>,
    pub name: Option<String>,
}

pub trait Display: Send {
    fn render(&mut self, snapshot: &DisplaySnapshot);
}

/// Renders snapshots as log lines
#[derive(Debug, Default)]
pub struct LogDisplay;

fn field(value: f32, valid: bool, precision: usize) -> String {
    if valid {
        format!("{:.*}", precision, value)
    } else {
        "--".to_string()
    }
}

impl Display for LogDisplay {
    fn render(&mut self, s: &DisplaySnapshot) {
        let v = s.frame.validity;
        info!(
            "[DISPLAY] CO2 {} ppm | {} C | {} % | {} m/s || {} {} ({}), fails {}, every {:?}, rssi {:?} dBm, {} / {}",
            field(s.frame.co2, v.co2, 0),
            field(s.frame.temperature, v.temperature, 1),
            field(s.frame.humidity, v.humidity, 1),
            field(s.frame.wind_speed, v.wind_speed, 2),
            s.transport,
            s.link_status,
            s.link_state,
            s.failures,
            s.interval,
            s.signal.and_then(|q| q.dbm()),
            s.imsi.as_deref().unwrap_or("-"),
            s.name.as_deref().unwrap_or("-"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uplink_shared::Reading;

    #[test]
    fn test_invalid_fields_render_as_dashes() {
        let frame = TelemetryFrame::from(&Reading {
            co2: Some(415.4),
            ..Default::default()
        });
        assert_eq!(field(frame.co2, frame.validity.co2, 0), "415");
        assert_eq!(field(frame.wind_speed, frame.validity.wind_speed, 2), "--");
    }
}
