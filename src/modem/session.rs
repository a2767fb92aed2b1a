//! Modem Session
//!
//! Owns the physical link: command layer bring-up, network registration,
//! packet-data context and the reset primitives. All link state is mutated
//! only through the transitions in [`LinkState::next`].

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uplink_shared::{limits, LinkEvent, LinkState, RetryPolicy};

use super::port::{CommandPort, Outcome, Reply};
use super::timeouts;
use crate::error::UplinkError;
use bytes::Bytes;

/// Packet-data access point credentials
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApnSettings {
    pub name: String,
    pub user: String,
    pub password: String,
}

impl Default for ApnSettings {
    fn default() -> Self {
        Self {
            name: "soracom.io".into(),
            user: "sora".into(),
            password: "sora".into(),
        }
    }
}

/// Network registration status reported by `+CEREG`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    NotSearching,
    Home,
    Searching,
    Denied,
    Unknown,
    Roaming,
}

impl Registration {
    fn from_stat(stat: u8) -> Self {
        match stat {
            0 => Registration::NotSearching,
            1 => Registration::Home,
            2 => Registration::Searching,
            3 => Registration::Denied,
            5 => Registration::Roaming,
            _ => Registration::Unknown,
        }
    }

    pub fn is_registered(self) -> bool {
        matches!(self, Registration::Home | Registration::Roaming)
    }
}

/// Signal quality from `+CSQ`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalQuality {
    /// 0..=31, 99 = unknown
    pub rssi: u8,
    pub ber: u8,
}

impl SignalQuality {
    /// Approximate received power
    pub fn dbm(&self) -> Option<i32> {
        (self.rssi <= 31).then(|| -113 + 2 * i32::from(self.rssi))
    }
}

/// Point-in-time view of the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModemStatus {
    pub state: LinkState,
    pub registration: Option<Registration>,
    pub signal: Option<SignalQuality>,
    pub local_address: Option<Ipv4Addr>,
}

/// The one modem, exclusively owned by the uplink manager
pub struct ModemSession<P> {
    port: P,
    apn: ApnSettings,
    state: LinkState,
    registration: Option<Registration>,
    signal: Option<SignalQuality>,
    local_address: Option<Ipv4Addr>,
    imei: Option<String>,
    registration_policy: RetryPolicy,
    settle: Duration,
}

impl<P: CommandPort> ModemSession<P> {
    pub fn new(port: P, apn: ApnSettings) -> Self {
        Self {
            port,
            apn,
            state: LinkState::Uninitialized,
            registration: None,
            signal: None,
            local_address: None,
            imei: None,
            registration_policy: RetryPolicy::registration(),
            settle: limits::HARD_RESET_SETTLE,
        }
    }

    /// Override the hardware settle time after a reboot
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn local_address(&self) -> Option<Ipv4Addr> {
        self.local_address
    }

    pub fn imei(&self) -> Option<&str> {
        self.imei.as_deref()
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Cached status, no modem traffic
    pub fn snapshot(&self) -> ModemStatus {
        ModemStatus {
            state: self.state,
            registration: self.registration,
            signal: self.signal,
            local_address: self.local_address,
        }
    }

    fn transition(&mut self, event: LinkEvent) {
        match self.state.next(event) {
            Some(next) => {
                if next != self.state {
                    debug!("[MODEM] {} -> {} ({:?})", self.state, next, event);
                }
                self.state = next;
            }
            None => warn!("[MODEM] Ignoring {:?} in state {}", event, self.state),
        }
    }

    /// Send one command; the outcome is left to the caller
    pub async fn command(&mut self, cmd: &str, timeout: Duration) -> Result<Reply, UplinkError> {
        let reply = self.port.command(cmd, timeout).await?;
        if !reply.is_ok() && reply.outcome != Outcome::Prompt {
            debug!("[MODEM] {} -> {:?}", cmd, reply.outcome);
        }
        Ok(reply)
    }

    /// Send one command and require `OK`
    pub async fn command_ok(&mut self, cmd: &str, timeout: Duration) -> Result<Reply, UplinkError> {
        let reply = self.command(cmd, timeout).await?;
        if reply.is_ok() {
            Ok(reply)
        } else {
            Err(UplinkError::Command {
                command: cmd.to_string(),
                outcome: reply.outcome,
            })
        }
    }

    pub async fn write_payload(
        &mut self,
        data: &[u8],
        timeout: Duration,
    ) -> Result<Reply, UplinkError> {
        Ok(self.port.write_payload(data, timeout).await?)
    }

    pub async fn wait_urc(
        &mut self,
        prefix: &str,
        timeout: Duration,
    ) -> Result<Option<String>, UplinkError> {
        Ok(self.port.wait_urc(prefix, timeout).await?)
    }

    pub async fn read_raw(
        &mut self,
        len: usize,
        timeout: Duration,
    ) -> Result<Option<Bytes>, UplinkError> {
        Ok(self.port.read_raw(len, timeout).await?)
    }

    /// Bring the modem to a command-ready state
    pub async fn initialize(&mut self) -> Result<(), UplinkError> {
        self.transition(LinkEvent::InitStarted);
        info!("[MODEM] Initializing...");

        let mut alive = false;
        for probe in 0..limits::LIVENESS_PROBES {
            if self.command("AT", timeouts::DEFAULT).await?.is_ok() {
                alive = true;
                break;
            }
            debug!("[MODEM] No answer to probe {}", probe + 1);
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        if !alive {
            error!("[MODEM] Modem unresponsive");
            self.transition(LinkEvent::Fault);
            return Err(UplinkError::LinkUnresponsive);
        }

        self.command_ok("ATE0", timeouts::DEFAULT).await?;
        // Verbose errors are optional on some firmware
        let _ = self.command("AT+CMEE=2", timeouts::DEFAULT).await?;

        let sim = self.command("AT+CPIN?", timeouts::DEFAULT).await?;
        match sim.field("+CPIN:") {
            Some("READY") => {}
            other => warn!("[MODEM] SIM not ready: {:?}", other),
        }

        let gsn = self.command("AT+GSN", timeouts::DEFAULT).await?;
        if gsn.is_ok() {
            self.imei = gsn
                .lines
                .iter()
                .find(|l| !l.is_empty() && l.chars().all(|c| c.is_ascii_digit()))
                .cloned();
        }

        info!("[MODEM] Command layer ready (IMEI {:?})", self.imei);
        Ok(())
    }

    async fn query_registration(&mut self) -> Result<Registration, UplinkError> {
        let reply = self.command("AT+CEREG?", timeouts::DEFAULT).await?;
        let registration = reply
            .field("+CEREG:")
            .and_then(|v| v.split(',').nth(1))
            .and_then(|stat| stat.trim().parse::<u8>().ok())
            .map(Registration::from_stat)
            .unwrap_or(Registration::Unknown);

        self.registration = Some(registration);
        if registration.is_registered() {
            self.transition(LinkEvent::Registered);
        }
        Ok(registration)
    }

    /// Poll registration with backoff between polls; never blocks indefinitely
    pub async fn wait_for_network_registration(
        &mut self,
        max_attempts: u32,
    ) -> Result<(), UplinkError> {
        info!("[MODEM] Waiting for network registration...");

        for attempt in 0..max_attempts {
            let registration = self.query_registration().await?;
            if registration.is_registered() {
                info!("[MODEM] Network registered ({:?})", registration);
                return Ok(());
            }

            if attempt + 1 < max_attempts {
                let delay = self.registration_policy.delay(attempt);
                info!(
                    "[MODEM] Registration {:?}, retry {}/{} in {:?}",
                    registration,
                    attempt + 1,
                    max_attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }

        error!("[MODEM] Registration not confirmed after {} attempts", max_attempts);
        self.transition(LinkEvent::Fault);
        Err(UplinkError::RegistrationTimeout {
            attempts: max_attempts,
        })
    }

    /// Current data-context address, `None` when inactive
    async fn query_data_context(&mut self) -> Result<Option<Ipv4Addr>, UplinkError> {
        let reply = self.command("AT+CNACT?", timeouts::DEFAULT).await?;
        let address = reply
            .lines
            .iter()
            .filter_map(|line| line.strip_prefix("+CNACT:"))
            .find_map(|rest| {
                let mut parts = rest.trim().splitn(3, ',');
                let cid = parts.next()?;
                let status = parts.next()?;
                let addr = parts.next()?.trim_matches('"').parse::<Ipv4Addr>().ok()?;
                (cid == "0" && status == "1" && !addr.is_unspecified()).then_some(addr)
            });
        Ok(address)
    }

    /// Configure the APN, activate packet data and read back the local address
    pub async fn activate_data_context(
        &mut self,
        apn: &ApnSettings,
    ) -> Result<Ipv4Addr, UplinkError> {
        info!("[MODEM] Activating data context (APN {})", apn.name);

        let cncfg = format!(
            "AT+CNCFG=0,1,\"{}\",\"{}\",\"{}\",3",
            apn.name, apn.user, apn.password
        );
        self.command_ok(&cncfg, timeouts::DEFAULT).await?;
        self.command_ok("AT+CNACT=0,1", timeouts::DATA_CONTEXT).await?;

        match self.query_data_context().await? {
            Some(address) => {
                self.local_address = Some(address);
                self.transition(LinkEvent::ContextActivated);
                info!("[MODEM] Data context active, local address {}", address);
                Ok(address)
            }
            None => {
                self.local_address = None;
                warn!("[MODEM] Data context activated without an address");
                Err(UplinkError::NoLocalAddress)
            }
        }
    }

    /// Best-effort data-context teardown
    pub async fn disconnect_data_context(&mut self) {
        if let Err(e) = self.command("AT+CNACT=0,0", timeouts::DATA_CONTEXT).await {
            warn!("[MODEM] Data context disconnect failed: {}", e);
        }
        self.local_address = None;
        if self.state == LinkState::DataContextActive {
            self.transition(LinkEvent::ContextLost);
        }
    }

    /// Registration is confirmed before any context counts as active
    async fn confirm_registration(&mut self) -> Result<(), UplinkError> {
        if matches!(self.state, LinkState::Uninitialized | LinkState::Faulted) {
            self.initialize().await?;
        }
        if self.query_registration().await?.is_registered() {
            return Ok(());
        }
        warn!("[MODEM] Not registered, waiting before data context repair");
        self.transition(LinkEvent::RegistrationLost);
        self.wait_for_network_registration(limits::REGISTRATION_ATTEMPTS)
            .await
    }

    /// Idempotent check-and-repair of the data context.
    ///
    /// After the first failed activation every further attempt runs a
    /// disconnect/reconnect cycle.
    pub async fn ensure_data_context_active(&mut self) -> Result<(), UplinkError> {
        if let Some(address) = self.query_data_context().await? {
            self.local_address = Some(address);
            if self.state != LinkState::DataContextActive {
                self.confirm_registration().await?;
                self.transition(LinkEvent::ContextActivated);
            }
            return Ok(());
        }

        warn!("[MODEM] Data context inactive, repairing");
        if self.state == LinkState::DataContextActive {
            self.transition(LinkEvent::ContextLost);
        }
        self.confirm_registration().await?;

        let apn = self.apn.clone();
        let policy = RetryPolicy::socket_open().with_max_attempts(limits::DATA_CONTEXT_ATTEMPTS);
        for attempt in 0..policy.max_attempts {
            if attempt > 0 {
                self.disconnect_data_context().await;
                tokio::time::sleep(policy.delay(attempt - 1)).await;
            }
            match self.activate_data_context(&apn).await {
                Ok(_) => return Ok(()),
                Err(e) => warn!(
                    "[MODEM] Activation attempt {}/{} failed: {}",
                    attempt + 1,
                    policy.max_attempts,
                    e
                ),
            }
        }

        Err(UplinkError::DataContextInactive {
            attempts: policy.max_attempts,
        })
    }

    /// initialize -> register -> activate
    pub async fn bring_up(&mut self) -> Result<(), UplinkError> {
        self.initialize().await?;
        self.wait_for_network_registration(limits::REGISTRATION_ATTEMPTS)
            .await?;
        let apn = self.apn.clone();
        self.activate_data_context(&apn).await?;
        match self.signal_quality().await {
            Ok(signal) => info!("[MODEM] Signal quality {:?} dBm", signal.dbm()),
            Err(e) => debug!("[MODEM] Signal query failed: {}", e),
        }
        Ok(())
    }

    /// Radio cycle without a reboot.
    ///
    /// Callers close any open transport channel first. Fails with
    /// `RegistrationTimeout` when the network does not come back within
    /// the extended registration window.
    pub async fn soft_reset(&mut self) -> Result<(), UplinkError> {
        warn!("[MODEM] Soft reset");

        self.disconnect_data_context().await;
        let _ = self.command("AT+CFUN=0", timeouts::RADIO).await?;
        self.registration = None;
        self.transition(LinkEvent::RegistrationLost);
        self.command_ok("AT+CFUN=1", timeouts::RADIO).await?;

        self.initialize().await?;
        self.wait_for_network_registration(limits::SOFT_RESET_REGISTRATION_ATTEMPTS)
            .await?;
        let apn = self.apn.clone();
        self.activate_data_context(&apn).await?;
        info!("[MODEM] Soft reset complete");
        Ok(())
    }

    /// Reboot the modem and repeat the full bring-up.
    ///
    /// Failure here is terminal for the device.
    pub async fn hard_reset(&mut self) -> Result<(), UplinkError> {
        error!("[MODEM] Hard reset: rebooting modem");

        // The reply is often lost while the modem reboots
        if let Err(e) = self.command("AT+CFUN=1,1", timeouts::RADIO).await {
            warn!("[MODEM] Reboot command failed: {}", e);
        }
        self.discard_link_state();
        tokio::time::sleep(self.settle).await;

        let result = self.bring_up().await;
        match &result {
            Ok(()) => info!("[MODEM] Hard reset complete"),
            Err(e) => {
                error!("[MODEM] Hard reset failed: {}", e);
                self.transition(LinkEvent::Fault);
            }
        }
        result
    }

    fn discard_link_state(&mut self) {
        self.transition(LinkEvent::Rebooted);
        self.registration = None;
        self.signal = None;
        self.local_address = None;
    }

    pub async fn signal_quality(&mut self) -> Result<SignalQuality, UplinkError> {
        let reply = self.command_ok("AT+CSQ", timeouts::DEFAULT).await?;
        let signal = reply
            .field("+CSQ:")
            .and_then(|v| {
                let (rssi, ber) = v.split_once(',')?;
                Some(SignalQuality {
                    rssi: rssi.trim().parse().ok()?,
                    ber: ber.trim().parse().ok()?,
                })
            })
            .ok_or_else(|| UplinkError::Command {
                command: "AT+CSQ".into(),
                outcome: Outcome::Error("unparseable +CSQ".into()),
            })?;
        self.signal = Some(signal);
        Ok(signal)
    }

    /// Query registration, signal and context, then report them
    pub async fn status(&mut self) -> Result<ModemStatus, UplinkError> {
        self.query_registration().await?;
        let _ = self.signal_quality().await;
        self.local_address = self.query_data_context().await?;
        Ok(self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::sim::SimModem;

    fn session(sim: SimModem) -> ModemSession<SimModem> {
        ModemSession::new(sim, ApnSettings::default()).with_settle(Duration::from_millis(10))
    }

    #[test]
    fn test_registration_codes() {
        assert!(Registration::from_stat(1).is_registered());
        assert!(Registration::from_stat(5).is_registered());
        assert!(!Registration::from_stat(2).is_registered());
        assert_eq!(Registration::from_stat(9), Registration::Unknown);
    }

    #[test]
    fn test_signal_dbm() {
        assert_eq!(SignalQuality { rssi: 0, ber: 99 }.dbm(), Some(-113));
        assert_eq!(SignalQuality { rssi: 31, ber: 99 }.dbm(), Some(-51));
        assert_eq!(SignalQuality { rssi: 99, ber: 99 }.dbm(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bring_up_reaches_online() {
        let mut modem = session(SimModem::new());
        modem.bring_up().await.expect("bring up");

        assert_eq!(modem.state(), LinkState::DataContextActive);
        assert_eq!(modem.local_address(), Some(Ipv4Addr::new(10, 160, 0, 7)));
        assert_eq!(modem.imei(), Some("860000000000001"));
        assert!(modem.port().count("AT+CNCFG=0,1,\"soracom.io\",\"sora\",\"sora\",3") == 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_modem() {
        let mut sim = SimModem::new();
        sim.responsive = false;
        let mut modem = session(sim);

        let result = modem.initialize().await;
        assert!(matches!(result, Err(UplinkError::LinkUnresponsive)));
        assert_eq!(modem.state(), LinkState::Faulted);
        assert_eq!(modem.port().count("AT"), limits::LIVENESS_PROBES as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_is_bounded() {
        let mut sim = SimModem::new();
        sim.network_available = false;
        let mut modem = session(sim);
        modem.initialize().await.expect("init");

        let result = modem.wait_for_network_registration(4).await;
        assert!(matches!(
            result,
            Err(UplinkError::RegistrationTimeout { attempts: 4 })
        ));
        assert_eq!(modem.port().count("AT+CEREG?"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_address_is_an_error() {
        let mut sim = SimModem::new();
        sim.null_address = true;
        let mut modem = session(sim);
        modem.initialize().await.expect("init");
        modem.wait_for_network_registration(1).await.expect("register");

        let result = modem.activate_data_context(&ApnSettings::default()).await;
        assert!(matches!(result, Err(UplinkError::NoLocalAddress)));
        assert_eq!(modem.state(), LinkState::NetworkRegistered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_context_is_noop_when_active() {
        let mut modem = session(SimModem::new());
        modem.bring_up().await.expect("bring up");
        let activations = modem.port().count("AT+CNACT=0,1");

        modem.ensure_data_context_active().await.expect("active");
        assert_eq!(modem.port().count("AT+CNACT=0,1"), activations);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_context_reconnects_after_first_failure() {
        let mut modem = session(SimModem::new());
        modem.bring_up().await.expect("bring up");

        modem.port_mut().drop_context();
        modem.port_mut().activation_failures = 1;
        modem.ensure_data_context_active().await.expect("repaired");

        assert_eq!(modem.state(), LinkState::DataContextActive);
        // second attempt is preceded by a disconnect
        let log = &modem.port().log;
        let last_disconnect = log.iter().rposition(|c| c == "AT+CNACT=0,0").expect("disconnect");
        let last_activate = log.iter().rposition(|c| c == "AT+CNACT=0,1").expect("activate");
        assert!(last_disconnect < last_activate);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_context_gives_up() {
        let mut modem = session(SimModem::new());
        modem.bring_up().await.expect("bring up");

        modem.port_mut().drop_context();
        modem.port_mut().activation_failures = u32::MAX;
        let result = modem.ensure_data_context_active().await;
        assert!(matches!(
            result,
            Err(UplinkError::DataContextInactive { attempts: 3 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_context_adopts_existing_address_once_registered() {
        let mut sim = SimModem::new();
        // left up by a previous run of the host
        sim.command("AT+CNACT=0,1", timeouts::DATA_CONTEXT)
            .await
            .expect("port");
        let mut modem = session(sim);
        assert_eq!(modem.state(), LinkState::Uninitialized);

        modem.ensure_data_context_active().await.expect("active");
        assert_eq!(modem.state(), LinkState::DataContextActive);
        assert_eq!(modem.local_address(), Some(Ipv4Addr::new(10, 160, 0, 7)));
        assert_eq!(modem.port().count("AT+CNACT=0,1"), 1);
        assert_eq!(modem.port().count("ATE0"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_context_waits_for_registration_first() {
        let mut sim = SimModem::new();
        sim.network_available = false;
        let mut modem = session(sim);
        modem.initialize().await.expect("init");

        let result = modem.ensure_data_context_active().await;
        assert!(matches!(
            result,
            Err(UplinkError::RegistrationTimeout { .. })
        ));
        assert_eq!(modem.port().count("AT+CNACT=0,1"), 0);
        assert_eq!(
            modem.port().count("AT+CEREG?"),
            1 + limits::REGISTRATION_ATTEMPTS as usize
        );
        assert_ne!(modem.state(), LinkState::DataContextActive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_reset_cycles_radio() {
        let mut modem = session(SimModem::new());
        modem.bring_up().await.expect("bring up");

        modem.soft_reset().await.expect("soft reset");
        assert_eq!(modem.port().count("AT+CFUN=0"), 1);
        assert_eq!(modem.port().count("AT+CFUN=1"), 1);
        assert!(modem.state().is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_reset_fails_without_network() {
        let mut modem = session(SimModem::new());
        modem.bring_up().await.expect("bring up");
        modem.port_mut().network_available = false;

        let result = modem.soft_reset().await;
        assert!(matches!(result, Err(UplinkError::RegistrationTimeout { .. })));
        assert_eq!(
            modem.port().count("AT+CEREG?"),
            1 + limits::SOFT_RESET_REGISTRATION_ATTEMPTS as usize
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_reset_rebuilds_link() {
        let mut modem = session(SimModem::new());
        modem.bring_up().await.expect("bring up");
        modem.port_mut().network_available = false;
        modem.port_mut().heal_on_reboot = true;

        modem.hard_reset().await.expect("hard reset");
        assert_eq!(modem.port().reboots, 1);
        assert!(modem.state().is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_signal() {
        let mut modem = session(SimModem::new());
        modem.bring_up().await.expect("bring up");

        let status = modem.status().await.expect("status");
        assert_eq!(status.registration, Some(Registration::Home));
        assert_eq!(status.signal, Some(SignalQuality { rssi: 18, ber: 99 }));
        assert!(status.local_address.is_some());
    }
}
