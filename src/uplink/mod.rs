//! Uplink resilience
//!
//! This module handles:
//! - Consecutive-failure and watchdog escalation over the reset ladder
//! - Validation and application of the remote configuration
//! - Ownership of the modem and the single active channel
//! - The periodic sample/send loop

mod config;
mod escalation;
mod manager;
mod scheduler;

pub use config::ConfigState;
pub use manager::UplinkManager;
pub use scheduler::UplinkScheduler;
