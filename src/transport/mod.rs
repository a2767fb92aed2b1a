//! Transports carried over the modem
//!
//! Exactly one channel is open at a time. The datagram channel carries the
//! 16-byte binary frame, the publish channel carries the text record.

mod datagram;
mod publish;
mod traits;

pub use datagram::DatagramChannel;
pub use publish::PublishChannel;
pub use traits::{ChannelState, UplinkChannel};

use bytes::Bytes;
use serde::Deserialize;
use tracing::warn;
use uplink_shared::{codec, TelemetryFrame, TransportKind, TransportSelection};

use crate::error::UplinkError;
use crate::modem::{timeouts, CommandPort, ModemSession, Outcome};

/// Remote datagram collector
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatagramEndpoint {
    pub host: String,
    pub port: u16,
}

impl Default for DatagramEndpoint {
    fn default() -> Self {
        Self {
            host: "uni.soracom.io".into(),
            port: 23080,
        }
    }
}

/// Publish broker
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub keepalive_s: u16,
}

impl Default for BrokerEndpoint {
    fn default() -> Self {
        Self {
            host: "beam.soracom.io".into(),
            port: 1883,
            keepalive_s: 60,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub datagram: DatagramEndpoint,
    pub broker: BrokerEndpoint,
}

/// Encode a frame the way the given transport carries it
pub fn encode(kind: TransportKind, frame: &TelemetryFrame) -> Bytes {
    match kind {
        TransportKind::Udp => codec::encode_binary(frame),
        TransportKind::Mqtt => Bytes::from(codec::encode_text(frame)),
    }
}

/// Create a closed channel for the selected transport
pub fn build_channel<P: CommandPort + 'static>(
    selection: &TransportSelection,
    endpoints: &Endpoints,
    client_id: &str,
) -> Box<dyn UplinkChannel<P>> {
    match selection {
        TransportSelection::Udp => Box::new(DatagramChannel::new(endpoints.datagram.clone())),
        TransportSelection::Mqtt { topic, qos } => Box::new(PublishChannel::new(
            endpoints.broker.clone(),
            client_id.to_string(),
            topic.clone(),
            *qos,
        )),
    }
}

/// announce length -> wait for `>` -> write -> wait for `OK`
pub(crate) async fn prompt_and_write<P: CommandPort>(
    modem: &mut ModemSession<P>,
    announce: &str,
    payload: &[u8],
    transport: TransportKind,
) -> Result<(), UplinkError> {
    let prompt = modem.command(announce, timeouts::PROMPT).await?;
    if prompt.outcome != Outcome::Prompt {
        warn!("[{}] No data prompt: {:?}", transport, prompt.outcome);
        return Err(UplinkError::SendTimeout {
            transport,
            stage: "data prompt",
        });
    }

    let ack = modem.write_payload(payload, timeouts::SEND_ACK).await?;
    if !ack.is_ok() {
        warn!("[{}] Payload not acknowledged: {:?}", transport, ack.outcome);
        return Err(UplinkError::SendTimeout {
            transport,
            stage: "acknowledgment",
        });
    }
    Ok(())
}
