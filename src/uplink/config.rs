//! Remote configuration in force on the device

use tracing::{info, warn};
use uplink_shared::{ConfigError, RemoteConfig, UserData};

/// Result of applying a fetched record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigChange {
    Unchanged,
    Applied { transport_changed: bool },
    Rejected(ConfigError),
}

/// Active configuration plus the last rejected record.
///
/// A rejected record leaves `active` untouched and suspends sends until
/// a valid record is observed.
#[derive(Debug, Clone, Default)]
pub struct ConfigState {
    active: RemoteConfig,
    rejected: Option<ConfigError>,
}

impl ConfigState {
    pub fn new(active: RemoteConfig) -> Self {
        Self {
            active,
            rejected: None,
        }
    }

    pub fn active(&self) -> &RemoteConfig {
        &self.active
    }

    pub fn rejected(&self) -> Option<&ConfigError> {
        self.rejected.as_ref()
    }

    pub fn sends_suspended(&self) -> bool {
        self.rejected.is_some()
    }

    pub fn apply(&mut self, data: &UserData) -> ConfigChange {
        match self.active.resolve(data) {
            Ok(next) => {
                if self.rejected.take().is_some() {
                    info!("[CONFIG] Valid configuration observed, sends resumed");
                }
                if next == self.active {
                    return ConfigChange::Unchanged;
                }
                let transport_changed = next.transport.kind() != self.active.transport.kind();
                info!(
                    "[CONFIG] Applied: interval {:?}, transport {}",
                    next.sample_interval,
                    next.transport.kind()
                );
                self.active = next;
                ConfigChange::Applied { transport_changed }
            }
            Err(e) => self.reject(e),
        }
    }

    /// Parse and apply a `/v1/userdata` body
    pub fn apply_json(&mut self, body: &str) -> ConfigChange {
        match UserData::from_json(body) {
            Ok(data) => self.apply(&data),
            Err(e) => self.reject(e),
        }
    }

    fn reject(&mut self, e: ConfigError) -> ConfigChange {
        warn!("[CONFIG] Rejected: {} (keeping {:?})", e, self.active.transport.kind());
        self.rejected = Some(e.clone());
        ConfigChange::Rejected(e)
    }
}
