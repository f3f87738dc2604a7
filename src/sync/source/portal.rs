//! HTTP record source for the maimai portal.
//!
//! # Architecture
//!
//! * One GET per fetch, authenticated by the `_t` / `userId` cookie pair.
//! * Redirects are never followed: the portal answers an expired credential with
//!   a redirect to its error page, and that redirect is the auth signal.
//! * A rotated credential arrives as `Set-Cookie: _t=...` on any response, including
//!   ones that then fail; those failures carry it in [`SourceError::Network`].
//! * The body is handed to a [`RecordExtractor`]; page parsing is not this type's job.

use std::time::Duration;

use reqwest::header::{HeaderMap, COOKIE, LOCATION, SET_COOKIE};
use reqwest::{redirect, StatusCode, Url};

use super::api::{FetchOutcome, RecordSource, SourceError};
use super::extract::{JsonExtractor, RecordExtractor};
use crate::error::{Result, SyncError};
use crate::sync::domain::SessionToken;

pub const DEFAULT_BASE_URL: &str = "https://maimai.wahlap.com/maimai-mobile/";
pub const DEFAULT_RECORD_PATH: &str = "record/";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Linux; Android 12) AppleWebKit/537.36 (KHTML, like Gecko) Mobile Safari/537.36";

/// Credential cookie name.
const CREDENTIAL_COOKIE: &str = "_t";

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub base_url: String,
    pub record_path: String,
    pub user_agent: String,
    pub request_timeout: Duration,
    /// Substrings that mark a 200 response as the portal's error page.
    pub error_markers: Vec<String>,
    /// Honour `HTTP_PROXY` / `HTTPS_PROXY` from the environment.
    pub use_system_proxy: bool,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            record_path: DEFAULT_RECORD_PATH.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(30),
            error_markers: default_error_markers(),
            use_system_proxy: true,
        }
    }
}

pub fn default_error_markers() -> Vec<String> {
    vec!["/maimai-mobile/error/".to_string(), "エラーコード".to_string()]
}

pub struct PortalSource<E = JsonExtractor> {
    http: reqwest::Client,
    record_url: Url,
    error_markers: Vec<String>,
    extractor: E,
}

impl PortalSource<JsonExtractor> {
    pub fn new(config: &PortalConfig) -> Result<Self> {
        Self::with_extractor(config, JsonExtractor)
    }
}

impl<E: RecordExtractor> PortalSource<E> {
    pub fn with_extractor(config: &PortalConfig, extractor: E) -> Result<Self> {
        let record_url = record_url(&config.base_url, &config.record_path)?;

        let mut builder = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout);
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }
        let http = builder
            .build()
            .map_err(|e| SyncError::Config(format!("http client: {e}")))?;

        log::info!("[PORTAL] record endpoint {}", record_url);

        Ok(Self {
            http,
            record_url,
            error_markers: config.error_markers.clone(),
            extractor,
        })
    }

    pub fn record_url(&self) -> &Url {
        &self.record_url
    }
}

impl<E: RecordExtractor + Send + Sync> RecordSource for PortalSource<E> {
    async fn fetch(&mut self, token: &SessionToken) -> Result<FetchOutcome, SourceError> {
        let response = self
            .http
            .get(self.record_url.clone())
            .header(COOKIE, cookie_header(token))
            .send()
            .await
            .map_err(|e| SourceError::network(describe_transport(&e)))?;

        let status = response.status();
        let renewed_credential = renewed_credential(response.headers());
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        // From here on the old credential may already be dead; failures carry the new one.
        let read = async {
            classify_status(status, location.as_deref())?;

            let body = response
                .text()
                .await
                .map_err(|e| SourceError::network(describe_transport(&e)))?;

            if let Some(marker) = self.error_markers.iter().find(|m| body.contains(m.as_str())) {
                return Err(SourceError::Auth(format!(
                    "portal served its error page (marker {marker:?})"
                )));
            }

            self.extractor.extract(&body)
        };
        let records = read
            .await
            .map_err(|e| e.with_renewed_credential(renewed_credential.clone()))?;

        log::debug!(
            "[PORTAL] {} raw records, credential renewed: {}",
            records.len(),
            renewed_credential.is_some()
        );

        Ok(FetchOutcome {
            records,
            renewed_credential,
        })
    }
}

// =====================================================================
// Helpers
// =====================================================================

pub(crate) fn record_url(base_url: &str, record_path: &str) -> Result<Url> {
    let mut base = base_url.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    let base = Url::parse(&base).map_err(|e| SyncError::Config(format!("base url {base_url:?}: {e}")))?;
    base.join(record_path.trim_start_matches('/'))
        .map_err(|e| SyncError::Config(format!("record path {record_path:?}: {e}")))
}

pub(crate) fn cookie_header(token: &SessionToken) -> String {
    format!(
        "{CREDENTIAL_COOKIE}={}; userId={}",
        token.credential, token.subject_id
    )
}

/// Maps a response status onto the network/auth split.
pub(crate) fn classify_status(status: StatusCode, location: Option<&str>) -> Result<(), SourceError> {
    if status.is_success() {
        return Ok(());
    }
    if status.is_redirection() {
        return Err(SourceError::Auth(format!(
            "redirected ({status}) to {}",
            location.unwrap_or("<no location>")
        )));
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(SourceError::Auth(format!("portal refused credential ({status})")))
        }
        _ => Err(SourceError::network(format!("portal answered {status}"))),
    }
}

/// The last non-empty `_t` value among the response's cookies.
pub(crate) fn renewed_credential(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(credential_from_set_cookie)
        .last()
}

fn credential_from_set_cookie(header: &str) -> Option<String> {
    let pair = header.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    (name.trim() == CREDENTIAL_COOKIE && !value.trim().is_empty()).then(|| value.trim().to_string())
}

fn describe_transport(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        format!("transport error: {err}")
    }
}
