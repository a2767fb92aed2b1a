//! Sensor collaborators
//!
//! Each sensor fills part of a [`Reading`] and may fail on its own. The
//! suite merges whatever the sensors produced; absent fields become the
//! frame sentinel downstream.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, warn};
use uplink_shared::Reading;

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("{sensor}: reading unavailable")]
    ReadingUnavailable { sensor: &'static str },
}

#[async_trait]
pub trait Sensor: Send {
    fn name(&self) -> &'static str;

    async fn read_measurement(&mut self) -> Result<Reading, SensorError>;
}

#[derive(Default)]
pub struct SensorSuite {
    sensors: Vec<Box<dyn Sensor>>,
}

impl SensorSuite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sensor: Box<dyn Sensor>) -> Self {
        self.sensors.push(sensor);
        self
    }

    /// CO2/climate plus airflow, both simulated
    pub fn simulated() -> Self {
        Self::new()
            .with(Box::new(SimulatedCo2Sensor::new()))
            .with(Box::new(SimulatedAirflowSensor::new()))
    }

    /// Read every sensor; a failed sensor only blanks its own fields
    pub async fn acquire(&mut self) -> Reading {
        let mut reading = Reading::default();
        for sensor in &mut self.sensors {
            match sensor.read_measurement().await {
                Ok(part) => reading.merge(part),
                Err(e) => warn!("[UPLINK] Sensor {} failed: {}", sensor.name(), e),
            }
        }
        debug!("[UPLINK] Acquired {:?}", reading);
        reading
    }
}

/// NDIR CO2 sensor with on-board temperature and humidity
pub struct SimulatedCo2Sensor {
    rng: StdRng,
    co2: f32,
    temperature: f32,
    humidity: f32,
}

impl SimulatedCo2Sensor {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    pub fn from_rng(rng: StdRng) -> Self {
        Self {
            rng,
            co2: 420.0,
            temperature: 22.0,
            humidity: 45.0,
        }
    }
}

impl Default for SimulatedCo2Sensor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sensor for SimulatedCo2Sensor {
    fn name(&self) -> &'static str {
        "co2"
    }

    async fn read_measurement(&mut self) -> Result<Reading, SensorError> {
        // random walk inside plausible indoor ranges
        self.co2 = (self.co2 + self.rng.random_range(-15.0..15.0)).clamp(400.0, 2000.0);
        self.temperature = (self.temperature + self.rng.random_range(-0.3..0.3)).clamp(-10.0, 45.0);
        self.humidity = (self.humidity + self.rng.random_range(-1.0..1.0)).clamp(0.0, 100.0);

        Ok(Reading {
            co2: Some(self.co2.round()),
            temperature: Some(self.temperature),
            humidity: Some(self.humidity),
            wind_speed: None,
        })
    }
}

/// Thermal airflow sensor, full scale 7.23 m/s
pub struct SimulatedAirflowSensor {
    rng: StdRng,
}

impl SimulatedAirflowSensor {
    pub const FULL_SCALE: f32 = 7.23;

    pub fn new() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    pub fn from_rng(rng: StdRng) -> Self {
        Self { rng }
    }
}

impl Default for SimulatedAirflowSensor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sensor for SimulatedAirflowSensor {
    fn name(&self) -> &'static str {
        "airflow"
    }

    async fn read_measurement(&mut self) -> Result<Reading, SensorError> {
        Ok(Reading {
            wind_speed: Some(self.rng.random_range(0.0..=Self::FULL_SCALE)),
            ..Default::default()
        })
    }
}
