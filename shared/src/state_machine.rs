//! Modem Link State Machine
//!
//! Defines valid link-state transitions for the cellular modem session.

use std::fmt;

/// Lifecycle state of the physical link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Uninitialized,
    /// Command layer being brought up, or ready but not registered
    Initializing,
    NetworkRegistered,
    DataContextActive,
    Faulted,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Uninitialized => "uninitialized",
            LinkState::Initializing => "initializing",
            LinkState::NetworkRegistered => "registered",
            LinkState::DataContextActive => "online",
            LinkState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Events that can trigger link-state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Command layer initialization started
    InitStarted,
    /// Network registration confirmed
    Registered,
    /// Packet-data context came up with an address
    ContextActivated,
    /// Packet-data context went down
    ContextLost,
    /// Registration dropped (radio off or network lost)
    RegistrationLost,
    /// Unrecoverable step failure
    Fault,
    /// Modem rebooted; all link state discarded
    Rebooted,
}

impl LinkState {
    /// Get the next state for a given event, if the transition is valid
    pub fn next(self, event: LinkEvent) -> Option<LinkState> {
        use LinkEvent::*;
        use LinkState::*;

        match (self, event) {
            // Faults and reboots are accepted from anywhere
            (_, Fault) => Some(Faulted),
            (_, Rebooted) => Some(Uninitialized),

            (Uninitialized | Faulted | Initializing, InitStarted) => Some(Initializing),

            (Initializing, Registered) => Some(NetworkRegistered),
            (NetworkRegistered, Registered) => Some(NetworkRegistered),
            (DataContextActive, Registered) => Some(DataContextActive),

            (NetworkRegistered | DataContextActive, ContextActivated) => Some(DataContextActive),
            (DataContextActive | NetworkRegistered, ContextLost) => Some(NetworkRegistered),

            (NetworkRegistered | DataContextActive | Initializing, RegistrationLost) => {
                Some(Initializing)
            }

            _ => None,
        }
    }

    /// True when IP traffic is possible
    pub fn is_online(self) -> bool {
        self == LinkState::DataContextActive
    }
}

/// Check if a transition from one state to another is generally valid
pub fn is_valid_transition(from: LinkState, to: LinkState) -> bool {
    use LinkState::*;

    match (from, to) {
        (a, b) if a == b => true,
        (_, Faulted) | (_, Uninitialized) => true,
        (Uninitialized | Faulted, Initializing) => true,
        (Initializing, NetworkRegistered) => true,
        (NetworkRegistered, DataContextActive) => true,
        (DataContextActive, NetworkRegistered) => true,
        (NetworkRegistered | DataContextActive, Initializing) => true,
        _ => false,
    }
}
