use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uplink_shared::codec::{self, CodecError, TelemetryFrame};

const DEFAULT_BIND: &str = "0.0.0.0:23080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let bind = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_BIND.to_string());
    let socket = UdpSocket::bind(&bind).await?;
    info!("Ingest listening on {}", socket.local_addr()?);

    let mut buf = [0u8; 512];
    loop {
        let (n, peer) = socket.recv_from(&mut buf).await?;
        handle_datagram(peer, &buf[..n]);
    }
}

fn handle_datagram(peer: SocketAddr, data: &[u8]) -> Option<TelemetryFrame> {
    match codec::decode_binary(data) {
        Ok(frame) => {
            info!(
                "[{}] co2={:.0}ppm temp={:.1}C humi={:.1}% wind={:.2}m/s",
                peer, frame.co2, frame.temperature, frame.humidity, frame.wind_speed
            );
            Some(frame)
        }
        Err(CodecError::InvalidLength(len)) => {
            warn!("[{}] Dropping {}-byte datagram", peer, len);
            None
        }
    }
}
