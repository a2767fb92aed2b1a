//! Uplink Scheduler
//!
//! The outer control loop: config refresh, sampling, sending and the
//! success watchdog, all driven from one ticker.

use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uplink_shared::TelemetryFrame;

use super::config::ConfigChange;
use super::escalation::RecoveryTier;
use super::manager::{SendOutcome, UplinkManager};
use crate::display::Display;
use crate::error::UplinkError;
use crate::modem::CommandPort;
use crate::sensors::SensorSuite;

/// Loop granularity
const TICK: Duration = Duration::from_millis(250);

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub config: Option<ConfigChange>,
    pub send: Option<SendOutcome>,
    pub watchdog: Option<RecoveryTier>,
}

pub struct UplinkScheduler<P> {
    manager: UplinkManager<P>,
    sensors: SensorSuite,
    display: Box<dyn Display>,
    config_refresh: Duration,
    last_sample: Option<Instant>,
    last_config_fetch: Option<Instant>,
    last_frame: TelemetryFrame,
}

fn due(last: Option<Instant>, every: Duration, now: Instant) -> bool {
    match last {
        Some(last) => now.saturating_duration_since(last) >= every,
        None => true,
    }
}

impl<P: CommandPort + 'static> UplinkScheduler<P> {
    /// `manager` is expected to have completed its cold start
    pub fn new(
        manager: UplinkManager<P>,
        sensors: SensorSuite,
        display: Box<dyn Display>,
        config_refresh: Duration,
    ) -> Self {
        Self {
            manager,
            sensors,
            display,
            config_refresh,
            last_sample: None,
            last_config_fetch: Some(Instant::now()),
            last_frame: TelemetryFrame::default(),
        }
    }

    pub fn manager(&self) -> &UplinkManager<P> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut UplinkManager<P> {
        &mut self.manager
    }

    pub fn last_frame(&self) -> &TelemetryFrame {
        &self.last_frame
    }

    pub async fn tick(&mut self, now: Instant) -> Result<TickReport, UplinkError> {
        let mut report = TickReport::default();

        if due(self.last_config_fetch, self.config_refresh, now) {
            self.last_config_fetch = Some(now);
            report.config = self.manager.refresh_config().await;
            match self.manager.modem_mut().status().await {
                Ok(status) => debug!("[MODEM] {:?}", status),
                Err(e) => warn!("[MODEM] Status query failed: {}", e),
            }
        }

        let interval = self.manager.config().active().sample_interval;
        if due(self.last_sample, interval, now) {
            self.last_sample = Some(now);
            let reading = self.sensors.acquire().await;
            let frame = TelemetryFrame::from(&reading);
            if !frame.has_data() {
                warn!("[UPLINK] No sensor produced a measurement");
            }
            self.last_frame = frame;

            report.send = Some(self.manager.send_frame(&frame, now).await?);
            self.display.render(&self.manager.snapshot(frame));
        }

        report.watchdog = self.manager.check_watchdog(now).await?;
        Ok(report)
    }

    /// Run until recovery is exhausted or the modem port is lost
    pub async fn run(&mut self) -> UplinkError {
        info!(
            "[UPLINK] Scheduler running, sampling every {:?}",
            self.manager.config().active().sample_interval
        );
        let mut ticker = interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.tick(Instant::now()).await {
                error!("[UPLINK] Stopping: {}", e);
                return e;
            }
        }
    }
}
