//! Uplink Manager
//!
//! Single owner of the modem session, the active channel, the failure
//! counters and the remote configuration. Everything runs on the caller's
//! task; there is never more than one modem exchange in flight.

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uplink_shared::{TelemetryFrame, TransportKind, UserData};

use super::config::{ConfigChange, ConfigState};
use super::escalation::{FailureEscalation, Recovery, RecoveryTier};
use crate::display::{DisplaySnapshot, LinkStatus};
use crate::error::UplinkError;
use crate::metadata::{Identity, MetadataClient};
use crate::modem::{CommandPort, ModemSession};
use crate::transport::{self, ChannelState, Endpoints, UplinkChannel};

/// Modem plus the channel riding on it; the target of recovery tiers
pub struct Link<P> {
    modem: ModemSession<P>,
    channel: Option<Box<dyn UplinkChannel<P>>>,
}

impl<P: CommandPort + 'static> Link<P> {
    fn new(modem: ModemSession<P>) -> Self {
        Self {
            modem,
            channel: None,
        }
    }

    async fn close_channel(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            channel.close(&mut self.modem).await;
        }
    }

    /// Replace the channel; the previous one is closed first
    async fn install(&mut self, channel: Box<dyn UplinkChannel<P>>) {
        if let Some(mut old) = self.channel.take() {
            info!("[UPLINK] Closing {} channel", old.kind());
            old.close(&mut self.modem).await;
        }
        self.channel = Some(channel);
    }

    async fn open_channel(&mut self) -> Result<(), UplinkError> {
        match self.channel.as_mut() {
            Some(channel) if channel.state() == ChannelState::Open => Ok(()),
            Some(channel) => channel.open(&mut self.modem).await,
            None => Ok(()),
        }
    }

    async fn send(&mut self, payload: &[u8]) -> Result<(), UplinkError> {
        match self.channel.as_mut() {
            Some(channel) => channel.send(&mut self.modem, payload).await,
            None => Err(UplinkError::ChannelClosed(TransportKind::Udp)),
        }
    }
}

#[async_trait]
impl<P: CommandPort + 'static> Recovery for Link<P> {
    async fn run_tier(&mut self, tier: RecoveryTier) -> Result<(), UplinkError> {
        self.close_channel().await;
        match tier {
            RecoveryTier::SoftReset => self.modem.soft_reset().await,
            RecoveryTier::HardReset => {
                // rebuilt from the active config on the next send
                self.channel = None;
                self.modem.hard_reset().await
            }
        }
    }
}

/// What happened to one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(TransportKind),
    /// Not attempted and not counted
    Skipped,
    Failed { reset: Option<RecoveryTier> },
}

pub struct UplinkManager<P> {
    link: Link<P>,
    escalation: FailureEscalation,
    config: ConfigState,
    endpoints: Endpoints,
    metadata: MetadataClient,
    identity: Identity,
    device_name: String,
}

impl<P: CommandPort + 'static> UplinkManager<P> {
    pub fn new(
        modem: ModemSession<P>,
        config: ConfigState,
        endpoints: Endpoints,
        metadata: MetadataClient,
        device_name: String,
    ) -> Self {
        Self {
            link: Link::new(modem),
            escalation: FailureEscalation::default(),
            config,
            endpoints,
            metadata,
            identity: Identity::default(),
            device_name,
        }
    }

    pub fn modem(&self) -> &ModemSession<P> {
        &self.link.modem
    }

    pub fn modem_mut(&mut self) -> &mut ModemSession<P> {
        &mut self.link.modem
    }

    pub fn config(&self) -> &ConfigState {
        &self.config
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.escalation.consecutive_failures()
    }

    pub fn channel_kind(&self) -> Option<TransportKind> {
        self.link.channel.as_ref().map(|c| c.kind())
    }

    /// open port -> initialize -> register -> activate -> config -> channel
    pub async fn cold_start(&mut self) -> Result<(), UplinkError> {
        info!("[UPLINK] Cold start");
        self.link.modem.bring_up().await?;
        self.refresh_identity().await;
        self.refresh_config().await;
        if let Err(e) = self.ensure_channel().await {
            warn!("[UPLINK] Initial channel open failed: {}", e);
        }
        Ok(())
    }

    pub async fn refresh_identity(&mut self) {
        self.identity = self.metadata.fetch_identity(&mut self.link.modem).await;
    }

    /// Fetch `/v1/userdata` and apply it; `None` when the fetch failed
    pub async fn refresh_config(&mut self) -> Option<ConfigChange> {
        match self.metadata.fetch_userdata(&mut self.link.modem).await {
            Ok(body) => {
                let change = self.config.apply_json(&body);
                self.on_config_change(&change).await;
                Some(change)
            }
            Err(e) => {
                warn!("[CONFIG] Fetch failed, keeping current config: {}", e);
                None
            }
        }
    }

    pub async fn apply_userdata(&mut self, data: &UserData) -> ConfigChange {
        let change = self.config.apply(data);
        self.on_config_change(&change).await;
        change
    }

    async fn on_config_change(&mut self, change: &ConfigChange) {
        let selection = self.config.active().transport.clone();
        match change {
            ConfigChange::Applied {
                transport_changed: true,
            } => {
                info!("[UPLINK] Switching transport to {}", selection.kind());
                let channel = self.build_channel();
                self.link.install(channel).await;
                if let Err(e) = self.link.open_channel().await {
                    warn!("[UPLINK] {} open after switch failed: {}", selection.kind(), e);
                }
            }
            ConfigChange::Applied {
                transport_changed: false,
            } => {
                if let Some(channel) = self.link.channel.as_mut() {
                    channel.retarget(&selection);
                }
            }
            ConfigChange::Unchanged | ConfigChange::Rejected(_) => {}
        }
    }

    fn build_channel(&self) -> Box<dyn UplinkChannel<P>> {
        let client_id = self.identity.client_id(&self.device_name);
        transport::build_channel(&self.config.active().transport, &self.endpoints, client_id)
    }

    /// Build the channel for the active config if needed and open it
    pub async fn ensure_channel(&mut self) -> Result<(), UplinkError> {
        let wanted = self.config.active().transport.kind();
        if self.channel_kind() != Some(wanted) {
            let channel = self.build_channel();
            self.link.install(channel).await;
        }
        self.link.open_channel().await
    }

    /// Send one frame on the active transport and account for the outcome.
    ///
    /// Errors only when recovery is exhausted or the command port is gone.
    pub async fn send_frame(
        &mut self,
        frame: &TelemetryFrame,
        now: Instant,
    ) -> Result<SendOutcome, UplinkError> {
        if let Some(reason) = self.config.rejected() {
            debug!("[UPLINK] Send skipped, config rejected: {}", reason);
            self.escalation.on_skipped(now);
            return Ok(SendOutcome::Skipped);
        }

        let kind = self.config.active().transport.kind();
        let payload = transport::encode(kind, frame);

        let result = match self.ensure_channel().await {
            Ok(()) => self.link.send(&payload).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.escalation.on_success(now);
                Ok(SendOutcome::Sent(kind))
            }
            Err(UplinkError::InvalidRemoteConfig(e)) => {
                warn!("[UPLINK] Send skipped: {}", e);
                self.escalation.on_skipped(now);
                Ok(SendOutcome::Skipped)
            }
            Err(e @ UplinkError::Port(_)) => Err(e),
            Err(e) => {
                warn!("[UPLINK] {} send failed: {}", kind, e);
                let reset = self.escalation.on_failure(now, &mut self.link).await?;
                Ok(SendOutcome::Failed { reset })
            }
        }
    }

    pub async fn check_watchdog(
        &mut self,
        now: Instant,
    ) -> Result<Option<RecoveryTier>, UplinkError> {
        self.escalation.check_watchdog(now, &mut self.link).await
    }

    pub fn link_status(&self) -> LinkStatus {
        if self.config.sends_suspended() {
            LinkStatus::Suspended
        } else if self.consecutive_failures() > 0 || !self.link.modem.state().is_online() {
            LinkStatus::Degraded
        } else {
            LinkStatus::Up
        }
    }

    pub fn snapshot(&self, frame: TelemetryFrame) -> DisplaySnapshot {
        let status = self.link.modem.snapshot();
        DisplaySnapshot {
            frame,
            transport: self.config.active().transport.kind(),
            link_state: status.state,
            link_status: self.link_status(),
            signal: status.signal,
            failures: self.consecutive_failures(),
            interval: self.config.active().sample_interval,
            imsi: self.identity.imsi.clone(),
            name: Some(self.identity.display_name(&self.device_name).to_string()),
        }
    }
}
