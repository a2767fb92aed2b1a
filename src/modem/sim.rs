//! Scripted modem for tests
//!
//! Answers the SIM7080 command subset the uplink uses and records every
//! command it receives.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use super::port::{CommandPort, Outcome, PortError, Reply};

pub const SIM_IMEI: &str = "860000000000001";
pub const SIM_ADDRESS: &str = "10.160.0.7";

pub struct SimModem {
    /// Every command received, in order
    pub log: Vec<String>,
    /// Payloads accepted: ("udp" or the topic, bytes)
    pub published: Vec<(String, Vec<u8>)>,
    pub responsive: bool,
    pub network_available: bool,
    /// Network comes back after the next reboot
    pub heal_on_reboot: bool,
    /// Payload writes are never acknowledged
    pub fail_sends: bool,
    pub fail_socket_open: bool,
    pub null_address: bool,
    /// Number of upcoming `AT+CNACT=0,1` that fail
    pub activation_failures: u32,
    pub reboots: u32,
    /// path -> (status, body)
    pub http: HashMap<String, (u16, String)>,

    radio_on: bool,
    context_active: bool,
    socket_open: bool,
    mqtt_connected: bool,
    http_connected: bool,
    pending_write: Option<(String, usize)>,
    http_body: Vec<u8>,
    urcs: VecDeque<String>,
    raw: VecDeque<u8>,
}

impl Default for SimModem {
    fn default() -> Self {
        Self::new()
    }
}

impl SimModem {
    pub fn new() -> Self {
        Self {
            log: Vec::new(),
            published: Vec::new(),
            responsive: true,
            network_available: true,
            heal_on_reboot: false,
            fail_sends: false,
            fail_socket_open: false,
            null_address: false,
            activation_failures: 0,
            reboots: 0,
            http: HashMap::new(),
            radio_on: true,
            context_active: false,
            socket_open: false,
            mqtt_connected: false,
            http_connected: false,
            pending_write: None,
            http_body: Vec::new(),
            urcs: VecDeque::new(),
            raw: VecDeque::new(),
        }
    }

    pub fn with_http(mut self, path: &str, status: u16, body: &str) -> Self {
        self.http.insert(path.to_string(), (status, body.to_string()));
        self
    }

    /// Exact-match count of a command
    pub fn count(&self, cmd: &str) -> usize {
        self.log.iter().filter(|c| c.as_str() == cmd).count()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.log.iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn first_position(&self, prefix: &str) -> Option<usize> {
        self.log.iter().position(|c| c.starts_with(prefix))
    }

    pub fn last_position(&self, prefix: &str) -> Option<usize> {
        self.log.iter().rposition(|c| c.starts_with(prefix))
    }

    /// Network drops the packet-data context and everything on top of it
    pub fn drop_context(&mut self) {
        self.context_active = false;
        self.socket_open = false;
        self.mqtt_connected = false;
    }

    pub fn socket_open(&self) -> bool {
        self.socket_open
    }

    pub fn mqtt_connected(&self) -> bool {
        self.mqtt_connected
    }

    fn registered(&self) -> bool {
        self.radio_on && self.network_available
    }

    fn power_cycle(&mut self) {
        self.drop_context();
        self.http_connected = false;
        self.pending_write = None;
        self.urcs.clear();
        self.raw.clear();
    }

    fn respond(&mut self, cmd: &str) -> Reply {
        let ok = Reply::ok;
        let error = || Reply::new(Outcome::Error("ERROR".into()), Vec::new());
        let info = |line: String| Reply::new(Outcome::Ok, vec![line]);

        match cmd {
            "AT" | "ATE0" | "AT+CMEE=2" => ok(),
            "AT+CPIN?" => info("+CPIN: READY".into()),
            "AT+GSN" => info(SIM_IMEI.into()),
            "AT+CSQ" => info("+CSQ: 18,99".into()),
            "AT+CEREG?" => {
                let stat = if self.registered() { 1 } else { 2 };
                info(format!("+CEREG: 0,{}", stat))
            }
            "AT+CNACT=0,1" => {
                if self.activation_failures > 0 {
                    self.activation_failures = self.activation_failures.saturating_sub(1);
                    error()
                } else if !self.registered() {
                    error()
                } else {
                    self.context_active = true;
                    ok()
                }
            }
            "AT+CNACT?" => {
                let line = if self.context_active {
                    let addr = if self.null_address { "0.0.0.0" } else { SIM_ADDRESS };
                    format!("+CNACT: 0,1,\"{}\"", addr)
                } else {
                    "+CNACT: 0,0,\"0.0.0.0\"".to_string()
                };
                info(line)
            }
            "AT+CNACT=0,0" => {
                self.drop_context();
                ok()
            }
            "AT+CFUN=0" => {
                self.radio_on = false;
                self.power_cycle();
                ok()
            }
            "AT+CFUN=1" => {
                self.radio_on = true;
                ok()
            }
            "AT+CFUN=1,1" => {
                self.reboots += 1;
                self.power_cycle();
                self.radio_on = true;
                if self.heal_on_reboot {
                    self.network_available = true;
                }
                // the reply is lost while rebooting
                Reply::new(Outcome::Timeout, Vec::new())
            }
            "AT+CACLOSE=0" => {
                self.socket_open = false;
                ok()
            }
            "AT+SMCONN" => {
                if self.context_active {
                    self.mqtt_connected = true;
                    ok()
                } else {
                    error()
                }
            }
            "AT+SMSTATE?" => info(format!("+SMSTATE: {}", u8::from(self.mqtt_connected))),
            "AT+SMDISC" => {
                self.mqtt_connected = false;
                ok()
            }
            "AT+SHCONN" => {
                if self.context_active {
                    self.http_connected = true;
                    ok()
                } else {
                    error()
                }
            }
            "AT+SHDISC" => {
                self.http_connected = false;
                ok()
            }
            _ if cmd.starts_with("AT+CNCFG=") => ok(),
            _ if cmd.starts_with("AT+SMCONF=") => ok(),
            _ if cmd.starts_with("AT+SHCONF=") => ok(),
            _ if cmd.starts_with("AT+CAOPEN=") => {
                if self.fail_socket_open || !self.context_active {
                    info("+CAOPEN: 0,1".into())
                } else {
                    self.socket_open = true;
                    info("+CAOPEN: 0,0".into())
                }
            }
            _ if cmd.starts_with("AT+CASEND=0,") => {
                match (self.socket_open, cmd["AT+CASEND=0,".len()..].parse::<usize>()) {
                    (true, Ok(len)) => {
                        self.pending_write = Some(("udp".into(), len));
                        Reply::new(Outcome::Prompt, Vec::new())
                    }
                    _ => error(),
                }
            }
            _ if cmd.starts_with("AT+SMPUB=") => {
                let args = &cmd["AT+SMPUB=".len()..];
                let parsed = args.rsplitn(4, ',').collect::<Vec<_>>();
                match (self.mqtt_connected, parsed.as_slice()) {
                    (true, [_, _, len, topic]) => match len.parse::<usize>() {
                        Ok(len) => {
                            self.pending_write = Some((topic.trim_matches('"').to_string(), len));
                            Reply::new(Outcome::Prompt, Vec::new())
                        }
                        Err(_) => error(),
                    },
                    _ => error(),
                }
            }
            _ if cmd.starts_with("AT+SHREQ=") => {
                if !self.http_connected {
                    return error();
                }
                let path = cmd["AT+SHREQ=".len()..]
                    .split(',')
                    .next()
                    .unwrap_or_default()
                    .trim_matches('"');
                let (status, body) = self
                    .http
                    .get(path)
                    .cloned()
                    .unwrap_or((404, String::new()));
                self.http_body = body.into_bytes();
                self.urcs.push_back(format!(
                    "+SHREQ: \"GET\",{},{}",
                    status,
                    self.http_body.len()
                ));
                ok()
            }
            _ if cmd.starts_with("AT+SHREAD=0,") => {
                let len = self.http_body.len();
                self.urcs.push_back(format!("+SHREAD: {}", len));
                self.raw.extend(self.http_body.drain(..));
                ok()
            }
            _ => error(),
        }
    }
}

#[async_trait]
impl CommandPort for SimModem {
    async fn command(&mut self, cmd: &str, _timeout: Duration) -> Result<Reply, PortError> {
        self.log.push(cmd.to_string());
        if !self.responsive {
            return Ok(Reply::new(Outcome::Timeout, Vec::new()));
        }
        Ok(self.respond(cmd))
    }

    async fn write_payload(&mut self, data: &[u8], _timeout: Duration) -> Result<Reply, PortError> {
        let Some((target, len)) = self.pending_write.take() else {
            return Ok(Reply::new(Outcome::Error("ERROR".into()), Vec::new()));
        };
        if self.fail_sends || data.len() != len {
            return Ok(Reply::new(Outcome::Timeout, Vec::new()));
        }
        self.published.push((target, data.to_vec()));
        Ok(Reply::ok())
    }

    async fn wait_urc(
        &mut self,
        prefix: &str,
        _timeout: Duration,
    ) -> Result<Option<String>, PortError> {
        let index = self.urcs.iter().position(|u| u.starts_with(prefix));
        Ok(index.and_then(|i| self.urcs.remove(i)))
    }

    async fn read_raw(
        &mut self,
        len: usize,
        _timeout: Duration,
    ) -> Result<Option<Bytes>, PortError> {
        if self.raw.len() < len {
            return Ok(None);
        }
        Ok(Some(self.raw.drain(..len).collect::<Vec<u8>>().into()))
    }
}
