//! Metadata service client
//!
//! Plain HTTP GETs carried over the modem's HTTP primitive. The service
//! answers requests from the device's own SIM, so no credentials are sent.

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::UplinkError;
use crate::modem::{timeouts, CommandPort, ModemSession};

/// Largest body the modem buffers
const BODY_LEN: usize = 1024;
const HEADER_LEN: usize = 350;

pub const USERDATA_PATH: &str = "/v1/userdata";
pub const IMSI_PATH: &str = "/v1/subscriber.imsi";
pub const NAME_PATH: &str = "/v1/subscriber.tags.name";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error(transparent)]
    Uplink(#[from] UplinkError),

    #[error("GET {path} returned {status}")]
    Status { path: String, status: u16 },

    #[error("GET {path}: no response")]
    NoResponse { path: String },

    #[error("GET {path}: body truncated")]
    BodyTruncated { path: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetadataSettings {
    pub host: String,
}

impl Default for MetadataSettings {
    fn default() -> Self {
        Self {
            host: "metadata.soracom.io".into(),
        }
    }
}

/// Subscriber and device identity strings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub imsi: Option<String>,
    pub name: Option<String>,
    pub imei: Option<String>,
}

impl Identity {
    /// IMSI, else IMEI, else `fallback`
    pub fn client_id<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.imsi
            .as_deref()
            .or(self.imei.as_deref())
            .unwrap_or(fallback)
    }

    pub fn display_name<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(fallback)
    }
}

pub struct MetadataClient {
    host: String,
}

impl MetadataClient {
    pub fn new(settings: &MetadataSettings) -> Self {
        Self {
            host: settings.host.clone(),
        }
    }

    /// GET `path`; the HTTP session is torn down whatever the outcome
    pub async fn get<P: CommandPort>(
        &self,
        modem: &mut ModemSession<P>,
        path: &str,
    ) -> Result<String, MetadataError> {
        let result = self.request(modem, path).await;
        if let Err(e) = modem.command("AT+SHDISC", timeouts::DEFAULT).await {
            debug!("[CONFIG] HTTP disconnect failed: {}", e);
        }
        result
    }

    async fn request<P: CommandPort>(
        &self,
        modem: &mut ModemSession<P>,
        path: &str,
    ) -> Result<String, MetadataError> {
        modem
            .command_ok(
                &format!("AT+SHCONF=\"URL\",\"http://{}\"", self.host),
                timeouts::DEFAULT,
            )
            .await?;
        modem
            .command_ok(&format!("AT+SHCONF=\"BODYLEN\",{}", BODY_LEN), timeouts::DEFAULT)
            .await?;
        modem
            .command_ok(&format!("AT+SHCONF=\"HEADERLEN\",{}", HEADER_LEN), timeouts::DEFAULT)
            .await?;
        modem.command_ok("AT+SHCONN", timeouts::HTTP_CONNECT).await?;

        modem
            .command_ok(&format!("AT+SHREQ=\"{}\",1", path), timeouts::DEFAULT)
            .await?;
        let no_response = || MetadataError::NoResponse {
            path: path.to_string(),
        };
        let urc = modem
            .wait_urc("+SHREQ:", timeouts::HTTP_RESPONSE)
            .await?
            .ok_or_else(no_response)?;
        let (status, len) = parse_shreq(&urc).ok_or_else(no_response)?;

        if status != 200 {
            return Err(MetadataError::Status {
                path: path.to_string(),
                status,
            });
        }
        if len == 0 {
            return Ok(String::new());
        }

        modem
            .command_ok(&format!("AT+SHREAD=0,{}", len), timeouts::DEFAULT)
            .await?;
        let truncated = || MetadataError::BodyTruncated {
            path: path.to_string(),
        };
        modem
            .wait_urc("+SHREAD:", timeouts::HTTP_RESPONSE)
            .await?
            .ok_or_else(truncated)?;
        let body = modem
            .read_raw(len, timeouts::HTTP_RESPONSE)
            .await?
            .ok_or_else(truncated)?;

        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    pub async fn fetch_userdata<P: CommandPort>(
        &self,
        modem: &mut ModemSession<P>,
    ) -> Result<String, MetadataError> {
        self.get(modem, USERDATA_PATH).await
    }

    /// Each identity string is optional; failures leave it absent
    pub async fn fetch_identity<P: CommandPort>(&self, modem: &mut ModemSession<P>) -> Identity {
        let mut identity = Identity {
            imei: modem.imei().map(str::to_string),
            ..Default::default()
        };

        for (path, slot) in [(IMSI_PATH, &mut identity.imsi), (NAME_PATH, &mut identity.name)] {
            match self.get(modem, path).await {
                Ok(body) => {
                    let trimmed = body.trim();
                    *slot = (!trimmed.is_empty()).then(|| trimmed.to_string());
                }
                Err(e) => warn!("[CONFIG] {}", e),
            }
        }

        info!(
            "[CONFIG] Identity: imsi {:?}, name {:?}",
            identity.imsi, identity.name
        );
        identity
    }
}

/// `+SHREQ: "GET",200,27` -> (200, 27)
fn parse_shreq(urc: &str) -> Option<(u16, usize)> {
    let rest = urc.strip_prefix("+SHREQ:")?;
    let mut parts = rest.trim().split(',').skip(1);
    let status = parts.next()?.trim().parse().ok()?;
    let len = parts.next()?.trim().parse().ok()?;
    Some((status, len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::sim::{SimModem, SIM_IMEI};
    use crate::modem::ApnSettings;

    async fn online(sim: SimModem) -> ModemSession<SimModem> {
        let mut modem = ModemSession::new(sim, ApnSettings::default());
        modem.bring_up().await.expect("bring up");
        modem
    }

    fn client() -> MetadataClient {
        MetadataClient::new(&MetadataSettings::default())
    }

    #[test]
    fn test_parse_shreq() {
        assert_eq!(parse_shreq("+SHREQ: \"GET\",200,27"), Some((200, 27)));
        assert_eq!(parse_shreq("+SHREQ: \"GET\",404,0"), Some((404, 0)));
        assert_eq!(parse_shreq("+SHREAD: 5"), None);
    }

    #[test]
    fn test_client_id_fallback_order() {
        let mut identity = Identity {
            imsi: Some("440103123456789".into()),
            name: None,
            imei: Some(SIM_IMEI.into()),
        };
        assert_eq!(identity.client_id("device"), "440103123456789");
        identity.imsi = None;
        assert_eq!(identity.client_id("device"), SIM_IMEI);
        identity.imei = None;
        assert_eq!(identity.client_id("device"), "device");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_userdata() {
        let body = r#"{"interval_s":30,"mqtt":false}"#;
        let mut modem = online(SimModem::new().with_http(USERDATA_PATH, 200, body)).await;

        let fetched = client().fetch_userdata(&mut modem).await.expect("fetch");
        assert_eq!(fetched, body);
        assert_eq!(
            modem.port().count("AT+SHCONF=\"URL\",\"http://metadata.soracom.io\""),
            1
        );
        assert_eq!(modem.port().count("AT+SHDISC"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_status_still_disconnects() {
        let mut modem = online(SimModem::new()).await;

        let result = client().fetch_userdata(&mut modem).await;
        assert!(matches!(result, Err(MetadataError::Status { status: 404, .. })));
        assert_eq!(modem.port().count("AT+SHDISC"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_is_trimmed_and_optional() {
        let sim = SimModem::new().with_http(IMSI_PATH, 200, " 440103123456789\n");
        let mut modem = online(sim).await;

        let identity = client().fetch_identity(&mut modem).await;
        assert_eq!(identity.imsi.as_deref(), Some("440103123456789"));
        assert_eq!(identity.name, None);
        assert_eq!(identity.imei.as_deref(), Some(SIM_IMEI));
    }
}
