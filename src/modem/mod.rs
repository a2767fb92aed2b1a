//! Cellular modem access
//!
//! This module handles:
//! - The typed command-response port (AT channel over serial)
//! - Link sequencing: initialization, registration, data context
//! - Soft and hard reset primitives

mod port;
mod session;

#[cfg(test)]
pub(crate) mod sim;

pub use port::{AtChannel, CommandPort, Outcome, PortError};
pub use session::{ApnSettings, ModemSession, SignalQuality};

/// Per-command response timeouts
pub mod timeouts {
    use std::time::Duration;

    pub const DEFAULT: Duration = Duration::from_secs(1);
    pub const RADIO: Duration = Duration::from_secs(10);
    pub const DATA_CONTEXT: Duration = Duration::from_secs(30);
    pub const SOCKET_OPEN: Duration = Duration::from_secs(10);
    pub const PROMPT: Duration = Duration::from_secs(5);
    pub const SEND_ACK: Duration = Duration::from_secs(10);
    pub const SESSION_CONNECT: Duration = Duration::from_secs(60);
    pub const HTTP_CONNECT: Duration = Duration::from_secs(30);
    pub const HTTP_RESPONSE: Duration = Duration::from_secs(30);
}
