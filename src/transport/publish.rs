//! Publish channel (modem-side MQTT session)

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uplink_shared::remote_config::validate_topic;
use uplink_shared::{limits, Qos, RetryPolicy, TransportKind, TransportSelection};

use super::traits::{ChannelState, UplinkChannel};
use super::{prompt_and_write, BrokerEndpoint};
use crate::error::UplinkError;
use crate::modem::{timeouts, CommandPort, ModemSession};

pub struct PublishChannel {
    broker: BrokerEndpoint,
    client_id: String,
    topic: String,
    qos: Qos,
    state: ChannelState,
    policy: RetryPolicy,
}

impl PublishChannel {
    pub fn new(broker: BrokerEndpoint, client_id: String, topic: String, qos: Qos) -> Self {
        Self {
            broker,
            client_id,
            topic,
            qos,
            state: ChannelState::Closed,
            policy: RetryPolicy::publish().with_max_attempts(limits::PUBLISH_CONNECT_ATTEMPTS),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn qos(&self) -> Qos {
        self.qos
    }

    async fn session_online<P: CommandPort>(
        modem: &mut ModemSession<P>,
    ) -> Result<bool, UplinkError> {
        let reply = modem.command("AT+SMSTATE?", timeouts::DEFAULT).await?;
        Ok(reply.is_ok() && reply.field("+SMSTATE:") == Some("1"))
    }

    async fn configure<P: CommandPort>(
        &self,
        modem: &mut ModemSession<P>,
    ) -> Result<(), UplinkError> {
        let params = [
            format!("\"URL\",\"{}\",{}", self.broker.host, self.broker.port),
            format!("\"CLIENTID\",\"{}\"", self.client_id),
            "\"CLEANSS\",1".to_string(),
            format!("\"KEEPTIME\",{}", self.broker.keepalive_s),
            "\"USERNAME\",\"\"".to_string(),
            "\"PASSWORD\",\"\"".to_string(),
            // per-message qos is given on publish
            "\"QOS\",0".to_string(),
        ];
        for param in params {
            modem
                .command_ok(&format!("AT+SMCONF={}", param), timeouts::DEFAULT)
                .await?;
        }
        Ok(())
    }

    async fn connect<P: CommandPort>(
        &mut self,
        modem: &mut ModemSession<P>,
    ) -> Result<(), UplinkError> {
        self.state = ChannelState::Opening;

        if Self::session_online(modem).await? {
            debug!("[MQTT] Session already connected");
            self.state = ChannelState::Open;
            return Ok(());
        }

        modem.ensure_data_context_active().await?;
        self.configure(modem).await?;

        for attempt in 0..self.policy.max_attempts {
            let reply = modem.command("AT+SMCONN", timeouts::SESSION_CONNECT).await?;
            if reply.is_ok() {
                self.state = ChannelState::Open;
                info!(
                    "[MQTT] Connected to {}:{} as {}",
                    self.broker.host, self.broker.port, self.client_id
                );
                return Ok(());
            }
            warn!(
                "[MQTT] Connect attempt {}/{} failed: {:?}",
                attempt + 1,
                self.policy.max_attempts,
                reply.outcome
            );
            if attempt + 1 < self.policy.max_attempts {
                tokio::time::sleep(self.policy.delay(attempt)).await;
            }
        }

        Err(UplinkError::TransportOpenFailed {
            transport: TransportKind::Mqtt,
            attempts: self.policy.max_attempts,
        })
    }
}

#[async_trait]
impl<P: CommandPort> UplinkChannel<P> for PublishChannel {
    fn kind(&self) -> TransportKind {
        TransportKind::Mqtt
    }

    fn state(&self) -> ChannelState {
        self.state
    }

    fn retarget(&mut self, selection: &TransportSelection) -> bool {
        match selection {
            TransportSelection::Mqtt { topic, qos } => {
                if *topic != self.topic || *qos != self.qos {
                    info!("[MQTT] Publishing to {} (qos {}) from now on", topic, qos.level());
                }
                self.topic = topic.clone();
                self.qos = *qos;
                true
            }
            TransportSelection::Udp => false,
        }
    }

    async fn open(&mut self, modem: &mut ModemSession<P>) -> Result<(), UplinkError> {
        let result = self.connect(modem).await;
        if result.is_err() {
            self.state = ChannelState::Closed;
        }
        result
    }

    async fn send(
        &mut self,
        modem: &mut ModemSession<P>,
        payload: &[u8],
    ) -> Result<(), UplinkError> {
        validate_topic(&self.topic)?;
        if self.state != ChannelState::Open {
            return Err(UplinkError::ChannelClosed(TransportKind::Mqtt));
        }

        if !Self::session_online(modem).await? {
            warn!("[MQTT] Session offline, reconnecting");
            self.open(modem).await?;
        }

        self.state = ChannelState::Sending;
        let announce = format!(
            "AT+SMPUB=\"{}\",{},{},0",
            self.topic,
            payload.len(),
            self.qos.level()
        );
        match prompt_and_write(modem, &announce, payload, TransportKind::Mqtt).await {
            Ok(()) => {
                self.state = ChannelState::Open;
                debug!("[MQTT] Published {} bytes to {}", payload.len(), self.topic);
                Ok(())
            }
            Err(e) => {
                self.state = ChannelState::Closed;
                Err(e)
            }
        }
    }

    async fn close(&mut self, modem: &mut ModemSession<P>) {
        if let Err(e) = modem.command("AT+SMDISC", timeouts::DEFAULT).await {
            debug!("[MQTT] Disconnect failed: {}", e);
        }
        if self.state != ChannelState::Closed {
            info!("[MQTT] Session closed");
        }
        self.state = ChannelState::Closed;
    }
}
