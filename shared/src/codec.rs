//! Telemetry frame codec
//!
//! The datagram transport carries a fixed 16-byte frame:
//! ```text
//! [ f32 LE co2 ][ f32 LE temperature ][ f32 LE humidity ][ f32 LE wind ]
//! ```
//!
//! The publish transport carries a JSON record with the same four values
//! rounded to a fixed number of decimals per field.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::Reading;

/// Size of an encoded datagram frame
pub const FRAME_LEN: usize = 16;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug, PartialEq)]
pub enum CodecError {
    #[error("Invalid frame length: {0} bytes (expected {FRAME_LEN})")]
    InvalidLength(usize),
}

/// Which fields of a frame came from a live measurement.
///
/// Only the display consumes this; the transports send the sentinel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Validity {
    pub co2: bool,
    pub temperature: bool,
    pub humidity: bool,
    pub wind_speed: bool,
}

/// Four-field telemetry record as sent upstream
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetryFrame {
    pub co2: f32,
    pub temperature: f32,
    pub humidity: f32,
    pub wind_speed: f32,
    pub validity: Validity,
}

/// Sentinel sent in place of a failed measurement
pub const SENTINEL: f32 = 0.0;

impl From<&Reading> for TelemetryFrame {
    fn from(reading: &Reading) -> Self {
        let field = |value: Option<f32>| match value {
            Some(v) if v.is_finite() => (v, true),
            _ => (SENTINEL, false),
        };
        let (co2, co2_ok) = field(reading.co2);
        let (temperature, temperature_ok) = field(reading.temperature);
        let (humidity, humidity_ok) = field(reading.humidity);
        let (wind_speed, wind_ok) = field(reading.wind_speed);

        Self {
            co2,
            temperature,
            humidity,
            wind_speed,
            validity: Validity {
                co2: co2_ok,
                temperature: temperature_ok,
                humidity: humidity_ok,
                wind_speed: wind_ok,
            },
        }
    }
}

impl TelemetryFrame {
    /// Build a frame where every field is valid
    pub fn new(co2: f32, temperature: f32, humidity: f32, wind_speed: f32) -> Self {
        Self::from(&Reading {
            co2: Some(co2),
            temperature: Some(temperature),
            humidity: Some(humidity),
            wind_speed: Some(wind_speed),
        })
    }

    /// True when at least one field is a live measurement
    pub fn has_data(&self) -> bool {
        let v = self.validity;
        v.co2 || v.temperature || v.humidity || v.wind_speed
    }
}

/// Encode a frame into the 16-byte datagram layout
pub fn encode_binary(frame: &TelemetryFrame) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_LEN);
    buf.put_f32_le(frame.co2);
    buf.put_f32_le(frame.temperature);
    buf.put_f32_le(frame.humidity);
    buf.put_f32_le(frame.wind_speed);
    buf.freeze()
}

/// Decode a 16-byte datagram frame.
///
/// The wire format carries no validity flags, so every decoded field is
/// marked valid.
pub fn decode_binary(mut buf: &[u8]) -> Result<TelemetryFrame, CodecError> {
    if buf.len() != FRAME_LEN {
        return Err(CodecError::InvalidLength(buf.len()));
    }

    let co2 = buf.get_f32_le();
    let temperature = buf.get_f32_le();
    let humidity = buf.get_f32_le();
    let wind_speed = buf.get_f32_le();

    Ok(TelemetryFrame {
        co2,
        temperature,
        humidity,
        wind_speed,
        validity: Validity {
            co2: true,
            temperature: true,
            humidity: true,
            wind_speed: true,
        },
    })
}

/// Encode a frame as the publish record:
/// `{"co2":415,"temp":23.5,"humi":48.2,"wind":1.07}`
pub fn encode_text(frame: &TelemetryFrame) -> String {
    format!(
        "{{\"co2\":{:.0},\"temp\":{:.1},\"humi\":{:.1},\"wind\":{:.2}}}",
        frame.co2, frame.temperature, frame.humidity, frame.wind_speed
    )
}
