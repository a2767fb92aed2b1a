//! Uplink channel abstraction over the modem's transport primitives

use async_trait::async_trait;
use uplink_shared::{TransportKind, TransportSelection};

use crate::error::UplinkError;
use crate::modem::{CommandPort, ModemSession};

/// Per-instance channel lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Closed,
    Opening,
    Open,
    Sending,
}

/// A transport carried by the modem.
///
/// Channels hold no reference to the modem; every operation borrows the
/// session for its duration so only one exchange is ever in flight. A
/// handshake failure leaves the channel `Closed` and callers re-open
/// before retrying.
#[async_trait]
pub trait UplinkChannel<P: CommandPort>: Send {
    fn kind(&self) -> TransportKind;

    fn state(&self) -> ChannelState;

    /// Adopt new parameters for the same transport kind.
    ///
    /// Returns false if the selection names another kind.
    fn retarget(&mut self, selection: &TransportSelection) -> bool;

    async fn open(&mut self, modem: &mut ModemSession<P>) -> Result<(), UplinkError>;

    async fn send(
        &mut self,
        modem: &mut ModemSession<P>,
        payload: &[u8],
    ) -> Result<(), UplinkError>;

    /// Best-effort teardown, safe on a channel that is already closed
    async fn close(&mut self, modem: &mut ModemSession<P>);
}
