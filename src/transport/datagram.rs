//! Datagram channel (modem-side UDP socket)

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uplink_shared::{limits, RetryPolicy, TransportKind, TransportSelection};

use super::traits::{ChannelState, UplinkChannel};
use super::{prompt_and_write, DatagramEndpoint};
use crate::error::UplinkError;
use crate::modem::{timeouts, CommandPort, ModemSession};

/// Socket handle on the modem; the firmware uses a single connection id
const CID: u8 = 0;

pub struct DatagramChannel {
    endpoint: DatagramEndpoint,
    state: ChannelState,
    policy: RetryPolicy,
}

impl DatagramChannel {
    pub fn new(endpoint: DatagramEndpoint) -> Self {
        Self {
            endpoint,
            state: ChannelState::Closed,
            policy: RetryPolicy::socket_open().with_max_attempts(limits::SOCKET_OPEN_ATTEMPTS),
        }
    }

    async fn try_open<P: CommandPort>(
        &self,
        modem: &mut ModemSession<P>,
    ) -> Result<(), UplinkError> {
        // Stale handle from a previous session; an error here just means none was open
        let _ = modem
            .command(&format!("AT+CACLOSE={}", CID), timeouts::DEFAULT)
            .await?;
        modem.ensure_data_context_active().await?;

        let cmd = format!(
            "AT+CAOPEN={},0,\"UDP\",\"{}\",{}",
            CID, self.endpoint.host, self.endpoint.port
        );
        let reply = modem.command(&cmd, timeouts::SOCKET_OPEN).await?;
        let opened = reply.is_ok() && reply.field("+CAOPEN:") == Some("0,0");
        if opened {
            Ok(())
        } else {
            Err(UplinkError::Command {
                command: cmd,
                outcome: reply.outcome,
            })
        }
    }
}

#[async_trait]
impl<P: CommandPort> UplinkChannel<P> for DatagramChannel {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn state(&self) -> ChannelState {
        self.state
    }

    fn retarget(&mut self, selection: &TransportSelection) -> bool {
        matches!(selection, TransportSelection::Udp)
    }

    async fn open(&mut self, modem: &mut ModemSession<P>) -> Result<(), UplinkError> {
        self.state = ChannelState::Opening;
        info!(
            "[UDP] Opening socket to {}:{}",
            self.endpoint.host, self.endpoint.port
        );

        for attempt in 0..self.policy.max_attempts {
            match self.try_open(modem).await {
                Ok(()) => {
                    self.state = ChannelState::Open;
                    info!("[UDP] Socket open");
                    return Ok(());
                }
                Err(e @ UplinkError::Port(_)) => {
                    self.state = ChannelState::Closed;
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "[UDP] Open attempt {}/{} failed: {}",
                        attempt + 1,
                        self.policy.max_attempts,
                        e
                    );
                    if attempt + 1 < self.policy.max_attempts {
                        tokio::time::sleep(self.policy.delay(attempt)).await;
                    }
                }
            }
        }

        self.state = ChannelState::Closed;
        Err(UplinkError::TransportOpenFailed {
            transport: TransportKind::Udp,
            attempts: self.policy.max_attempts,
        })
    }

    async fn send(
        &mut self,
        modem: &mut ModemSession<P>,
        payload: &[u8],
    ) -> Result<(), UplinkError> {
        if self.state != ChannelState::Open {
            return Err(UplinkError::ChannelClosed(TransportKind::Udp));
        }

        self.state = ChannelState::Sending;
        let announce = format!("AT+CASEND={},{}", CID, payload.len());
        match prompt_and_write(modem, &announce, payload, TransportKind::Udp).await {
            Ok(()) => {
                self.state = ChannelState::Open;
                debug!("[UDP] Sent {} bytes", payload.len());
                Ok(())
            }
            Err(e) => {
                self.state = ChannelState::Closed;
                Err(e)
            }
        }
    }

    async fn close(&mut self, modem: &mut ModemSession<P>) {
        if let Err(e) = modem
            .command(&format!("AT+CACLOSE={}", CID), timeouts::DEFAULT)
            .await
        {
            debug!("[UDP] Close failed: {}", e);
        }
        if self.state != ChannelState::Closed {
            info!("[UDP] Socket closed");
        }
        self.state = ChannelState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::sim::SimModem;
    use crate::modem::ApnSettings;

    async fn online() -> ModemSession<SimModem> {
        let mut modem = ModemSession::new(SimModem::new(), ApnSettings::default());
        modem.bring_up().await.expect("bring up");
        modem
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_and_send_frame() {
        let mut modem = online().await;
        let mut channel = DatagramChannel::new(DatagramEndpoint::default());

        channel.open(&mut modem).await.expect("open");
        assert_eq!(UplinkChannel::<SimModem>::state(&channel), ChannelState::Open);
        assert_eq!(
            modem.port().count("AT+CAOPEN=0,0,\"UDP\",\"uni.soracom.io\",23080"),
            1
        );

        channel.send(&mut modem, &[0u8; 16]).await.expect("send");
        assert_eq!(modem.port().count("AT+CASEND=0,16"), 1);
        assert_eq!(modem.port().published, vec![("udp".to_string(), vec![0u8; 16])]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_open_attempt_closes_stale_handle() {
        let mut modem = online().await;
        modem.port_mut().fail_socket_open = true;
        let mut channel = DatagramChannel::new(DatagramEndpoint::default());

        let result = channel.open(&mut modem).await;
        assert!(matches!(
            result,
            Err(UplinkError::TransportOpenFailed {
                transport: TransportKind::Udp,
                attempts: 3
            })
        ));
        assert_eq!(modem.port().count_prefix("AT+CAOPEN="), 3);
        assert_eq!(modem.port().count("AT+CACLOSE=0"), 3);
        assert_eq!(UplinkChannel::<SimModem>::state(&channel), ChannelState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_repairs_data_context() {
        let mut modem = online().await;
        modem.port_mut().drop_context();
        let mut channel = DatagramChannel::new(DatagramEndpoint::default());

        channel.open(&mut modem).await.expect("open");
        assert!(modem.port().socket_open());
        assert_eq!(modem.port().count("AT+CNACT=0,1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_timeout_closes_channel() {
        let mut modem = online().await;
        let mut channel = DatagramChannel::new(DatagramEndpoint::default());
        channel.open(&mut modem).await.expect("open");

        modem.port_mut().fail_sends = true;
        let result = channel.send(&mut modem, &[1u8; 16]).await;
        assert!(matches!(
            result,
            Err(UplinkError::SendTimeout {
                stage: "acknowledgment",
                ..
            })
        ));
        assert_eq!(UplinkChannel::<SimModem>::state(&channel), ChannelState::Closed);

        let again = channel.send(&mut modem, &[1u8; 16]).await;
        assert!(matches!(again, Err(UplinkError::ChannelClosed(TransportKind::Udp))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_prompt_is_send_timeout() {
        let mut modem = online().await;
        let mut channel = DatagramChannel::new(DatagramEndpoint::default());
        channel.open(&mut modem).await.expect("open");

        // socket vanished underneath the channel
        modem.port_mut().drop_context();
        let result = channel.send(&mut modem, &[1u8; 16]).await;
        assert!(matches!(
            result,
            Err(UplinkError::SendTimeout {
                stage: "data prompt",
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent() {
        let mut modem = online().await;
        let mut channel = DatagramChannel::new(DatagramEndpoint::default());

        channel.close(&mut modem).await;
        channel.close(&mut modem).await;
        assert_eq!(UplinkChannel::<SimModem>::state(&channel), ChannelState::Closed);
        assert_eq!(modem.port().count("AT+CACLOSE=0"), 2);
    }
}
