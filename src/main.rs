mod display;
mod error;
mod metadata;
mod modem;
mod sensors;
mod settings;
mod transport;
mod uplink;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_serial::SerialPortBuilderExt;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uplink_shared::{RemoteConfig, TransportSelection};

use display::LogDisplay;
use metadata::MetadataClient;
use modem::{AtChannel, ModemSession};
use sensors::SensorSuite;
use settings::{Args, DeviceSettings};
use transport::Endpoints;
use uplink::{ConfigState, UplinkManager, UplinkScheduler};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let settings = DeviceSettings::load(&args)?;

    info!("Uplink device starting: {}", settings.device_name);
    info!("  Modem: {} @ {}", settings.modem.port, settings.modem.baud);
    info!(
        "  Datagram: {}:{}",
        settings.datagram.host, settings.datagram.port
    );
    info!("  Broker: {}:{}", settings.broker.host, settings.broker.port);

    loop {
        tokio::select! {
            result = run_device(&settings) => {
                if let Err(e) = result {
                    error!("[UPLINK] Device restart: {:#}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }

        let delay = settings.schedule.restart_delay();
        warn!("[UPLINK] Cold start in {:?}", delay);
        tokio::time::sleep(delay).await;
    }
}

/// One device lifetime: cold start, then the scheduler until it gives up.
///
/// Everything (serial port included) is dropped on return.
async fn run_device(settings: &DeviceSettings) -> Result<()> {
    let serial = tokio_serial::new(&settings.modem.port, settings.modem.baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .stop_bits(tokio_serial::StopBits::One)
        .parity(tokio_serial::Parity::None)
        .open_native_async()
        .with_context(|| format!("Opening modem port {}", settings.modem.port))?;

    let modem = ModemSession::new(AtChannel::new(serial), settings.apn.clone());
    let initial = RemoteConfig {
        sample_interval: settings.schedule.interval(),
        transport: TransportSelection::Udp,
    };
    let endpoints = Endpoints {
        datagram: settings.datagram.clone(),
        broker: settings.broker.clone(),
    };

    let mut manager = UplinkManager::new(
        modem,
        ConfigState::new(initial),
        endpoints,
        MetadataClient::new(&settings.metadata),
        settings.device_name.clone(),
    );
    manager.cold_start().await.context("Cold start failed")?;

    let mut scheduler = UplinkScheduler::new(
        manager,
        SensorSuite::simulated(),
        Box::new(LogDisplay),
        settings.schedule.config_refresh(),
    );
    Err(scheduler.run().await.into())
}
