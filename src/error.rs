//! Error kinds for the uplink

use thiserror::Error;
use uplink_shared::{ConfigError, TransportKind};

use crate::modem::{Outcome, PortError};

/// Errors raised while driving the modem and transports
#[derive(Error, Debug)]
pub enum UplinkError {
    #[error("Modem did not answer the liveness probe")]
    LinkUnresponsive,

    #[error("Network registration not confirmed after {attempts} attempts")]
    RegistrationTimeout { attempts: u32 },

    #[error("Data context inactive after {attempts} activation attempts")]
    DataContextInactive { attempts: u32 },

    #[error("Data context activated without a local address")]
    NoLocalAddress,

    #[error("{transport} channel failed to open after {attempts} attempts")]
    TransportOpenFailed { transport: TransportKind, attempts: u32 },

    #[error("{0} channel is not open")]
    ChannelClosed(TransportKind),

    #[error("{transport} send timed out waiting for {stage}")]
    SendTimeout {
        transport: TransportKind,
        stage: &'static str,
    },

    #[error("Invalid remote config: {0}")]
    InvalidRemoteConfig(#[from] ConfigError),

    #[error("Command {command} failed: {outcome:?}")]
    Command { command: String, outcome: Outcome },

    #[error("Command port error: {0}")]
    Port(#[from] PortError),

    #[error("All recovery tiers exhausted")]
    Unrecoverable,
}
