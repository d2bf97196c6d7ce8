//! HTTP(S) client for the host's control protocol.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pistream_core::{ControlError, PairState, SessionParams, StreamConfiguration};
use pistream_identity::IdentityProvider;
use tracing::{debug, info, warn};

use crate::crypto;
use crate::hex;
use crate::pairing::{PairingChannel, PairingManager};
use crate::tls;
use crate::xml::XmlResponse;

pub const HTTP_PORT: u16 = 47989;
pub const HTTPS_PORT: u16 = 47984;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const STATUS_OK: u32 = 200;
const STATUS_UNAUTHORIZED: u32 = 401;

// ── Response types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub hostname: String,
    pub paired: bool,
    /// Id of the running app, 0 when none.
    pub current_game: u32,
    pub state: String,
    pub app_version: Option<String>,
}

impl ServerInfo {
    fn from_xml(doc: &XmlResponse) -> Self {
        Self {
            hostname: doc.tag("hostname").unwrap_or_default(),
            paired: doc.tag("PairStatus").as_deref() == Some("1"),
            current_game: doc.tag("currentgame").and_then(|v| v.parse().ok()).unwrap_or(0),
            state: doc.tag("state").unwrap_or_default(),
            app_version: doc.tag("appversion"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppEntry {
    pub id: u32,
    pub title: String,
    pub running: bool,
}

// ── HostClient ───────────────────────────────────────────────────────────────

/// Control-plane client bound to one host.
///
/// Holds a plain HTTP client and an HTTPS client presenting the identity's
/// certificate. No retries at this layer.
pub struct HostClient {
    host: String,
    identity: Arc<dyn IdentityProvider>,
    http: reqwest::Client,
    https: reqwest::Client,
}

impl HostClient {
    pub fn new(host: &str, identity: Arc<dyn IdentityProvider>) -> Result<Self, ControlError> {
        let build_err = |e: reqwest::Error| ControlError::protocol(format!("HTTP client: {e}"));

        let http = reqwest::Client::builder()
            .no_proxy()
            .connect_timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(build_err)?;
        let https = reqwest::Client::builder()
            .no_proxy()
            .connect_timeout(REQUEST_TIMEOUT)
            .use_preconfigured_tls(tls::client_config(identity.credentials())?)
            .build()
            .map_err(build_err)?;

        Ok(Self { host: host.to_owned(), identity, http, https })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, secure: bool, command: &str) -> String {
        let (scheme, port) = if secure { ("https", HTTPS_PORT) } else { ("http", HTTP_PORT) };
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("{scheme}://[{}]:{port}/{command}", self.host)
        } else {
            format!("{scheme}://{}:{port}/{command}", self.host)
        }
    }

    /// One request; `uniqueid` and `devicename` are always added.
    pub async fn request(
        &self,
        secure: bool,
        command: &str,
        params: &[(&str, String)],
        timeout: Duration,
    ) -> Result<XmlResponse, ControlError> {
        let mut query: Vec<(&str, String)> = vec![
            ("uniqueid", self.identity.unique_id()?),
            ("devicename", self.identity.device_name().to_owned()),
        ];
        query.extend(params.iter().cloned());

        let client = if secure { &self.https } else { &self.http };
        let url = self.url(secure, command);
        debug!("GET {} {:?}", url, params.iter().map(|(k, _)| *k).collect::<Vec<_>>());

        let response = client
            .get(&url)
            .query(&query)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| unreachable(&url, e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| unreachable(&url, e))?;
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ControlError::Unauthorized);
        }

        let doc = match XmlResponse::parse(&body) {
            Ok(doc) => doc,
            Err(_) if !status.is_success() => {
                return Err(ControlError::protocol(format!("{command}: HTTP {status}")))
            }
            Err(e) => return Err(e),
        };
        match doc.status_code {
            STATUS_OK => Ok(doc),
            STATUS_UNAUTHORIZED => Err(ControlError::Unauthorized),
            code => Err(ControlError::protocol(format!(
                "{command}: {code} {}",
                doc.status_message
            ))),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    /// `serverinfo` over HTTPS, falling back to HTTP when TLS is refused.
    pub async fn server_info(&self) -> Result<ServerInfo, ControlError> {
        match self.request(true, "serverinfo", &[], REQUEST_TIMEOUT).await {
            Ok(doc) => Ok(ServerInfo::from_xml(&doc)),
            Err(e @ (ControlError::HostUnreachable(_) | ControlError::Unauthorized)) => {
                debug!("HTTPS serverinfo failed ({}), retrying over HTTP", e);
                let doc = self.request(false, "serverinfo", &[], REQUEST_TIMEOUT).await?;
                Ok(ServerInfo::from_xml(&doc))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_pair_state(&self) -> Result<PairState, ControlError> {
        let info = self.server_info().await?;
        Ok(if info.paired { PairState::Paired } else { PairState::NotPaired })
    }

    pub async fn app_list(&self) -> Result<Vec<AppEntry>, ControlError> {
        let doc = self.request(true, "applist", &[], REQUEST_TIMEOUT).await?;
        let apps = doc
            .root
            .children("App")
            .into_iter()
            .filter_map(|app| {
                Some(AppEntry {
                    id: app.tag("ID")?.parse().ok()?,
                    title: app.tag("AppTitle")?,
                    running: app.tag("IsRunning").as_deref() == Some("1"),
                })
            })
            .collect();
        Ok(apps)
    }

    /// Case-insensitive lookup of an app by title.
    pub async fn find_app(&self, title: &str) -> Result<Option<AppEntry>, ControlError> {
        let apps = self.app_list().await?;
        Ok(apps.into_iter().find(|a| a.title.eq_ignore_ascii_case(title)))
    }

    // ── Session control ──────────────────────────────────────────────────────

    /// Starts `app_id` with a fresh remote-input key.
    pub async fn launch(
        &self,
        app_id: u32,
        config: &StreamConfiguration,
    ) -> Result<SessionParams, ControlError> {
        let params = new_session_params();
        let doc = self
            .request(
                true,
                "launch",
                &[
                    ("appid", app_id.to_string()),
                    ("mode", config.mode_string()),
                    ("additionalStates", "1".into()),
                    ("sops", "1".into()),
                    ("rikey", hex::encode(&params.remote_input_key)),
                    ("rikeyid", params.remote_input_key_id.to_string()),
                    ("localAudioPlayMode", "0".into()),
                ],
                REQUEST_TIMEOUT,
            )
            .await?;
        expect_nonzero(&doc, "gamesession", "launch")?;
        info!("Launched app {} at {}", app_id, config.mode_string());
        Ok(params)
    }

    /// Reattaches to the app already running on the host.
    pub async fn resume(&self) -> Result<SessionParams, ControlError> {
        let params = new_session_params();
        let doc = self
            .request(
                true,
                "resume",
                &[
                    ("rikey", hex::encode(&params.remote_input_key)),
                    ("rikeyid", params.remote_input_key_id.to_string()),
                ],
                REQUEST_TIMEOUT,
            )
            .await?;
        expect_nonzero(&doc, "resume", "resume")?;
        info!("Resumed running app");
        Ok(params)
    }

    /// Quits the running app.
    pub async fn quit(&self) -> Result<(), ControlError> {
        let doc = self.request(true, "cancel", &[], REQUEST_TIMEOUT).await?;
        expect_nonzero(&doc, "cancel", "quit")
    }

    pub async fn unpair(&self) -> Result<(), ControlError> {
        self.request(false, "unpair", &[], REQUEST_TIMEOUT).await?;
        info!("Unpaired from {}", self.host);
        Ok(())
    }

    /// PIN pairing; see [`PairingManager::pair`].
    pub async fn pair(&self, pin: &str) -> Result<PairState, ControlError> {
        PairingManager::new(self, self.identity.credentials()).pair(pin).await
    }
}

#[async_trait]
impl PairingChannel for HostClient {
    async fn pair_state(&self) -> Result<PairState, ControlError> {
        self.get_pair_state().await
    }

    async fn pair_request(
        &self,
        secure: bool,
        params: &[(&str, String)],
        timeout: Duration,
    ) -> Result<XmlResponse, ControlError> {
        let mut query = vec![("updateState", "1".to_owned())];
        query.extend(params.iter().cloned());
        self.request(secure, "pair", &query, timeout).await
    }

    async fn unpair(&self) -> Result<(), ControlError> {
        HostClient::unpair(self).await
    }
}

fn new_session_params() -> SessionParams {
    let key_id: [u8; 4] = crypto::random_bytes();
    SessionParams {
        remote_input_key: crypto::random_bytes(),
        remote_input_key_id: i32::from_be_bytes(key_id),
    }
}

fn expect_nonzero(doc: &XmlResponse, tag: &str, command: &str) -> Result<(), ControlError> {
    match doc.tag(tag).as_deref() {
        Some(v) if v != "0" => Ok(()),
        other => {
            warn!("{} refused by host ({}={:?})", command, tag, other);
            Err(ControlError::protocol(format!("{command} refused by host")))
        }
    }
}

fn unreachable(url: &str, e: reqwest::Error) -> ControlError {
    if e.is_timeout() {
        ControlError::HostUnreachable(format!("{url}: timed out"))
    } else if e.is_connect() || e.is_request() {
        ControlError::HostUnreachable(format!("{url}: {e}"))
    } else {
        ControlError::protocol(format!("{url}: {e}"))
    }
}
