//! Outbound telephony provider client and recording download.
//!
//! Two narrow HTTP concerns live here: placing outbound calls through the
//! provider's REST API, and fetching caller recordings the provider hosts.
//! Both authenticate with the account SID / auth token pair.

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelephonyError {
    #[error("telephony provider is not configured")]
    NotConfigured,

    #[error("provider request failed: {0}")]
    Request(String),

    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("recording download failed: {0}")]
    Download(String),
}

/// Credentials and addressing for the provider REST API.
#[derive(Clone)]
pub struct TelephonyConfig {
    /// REST API base, e.g. `https://api.twilio.com`. Overridable for tests.
    pub api_base: String,
    pub account_sid: String,
    pub auth_token: String,
    /// Caller ID for outbound calls.
    pub from_number: String,
}

impl std::fmt::Debug for TelephonyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelephonyConfig")
            .field("api_base", &self.api_base)
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"[REDACTED]")
            .field("from_number", &self.from_number)
            .finish()
    }
}

#[derive(Deserialize)]
struct CreateCallResponse {
    sid: String,
}

/// Client for the provider's call-placement API.
#[derive(Debug, Clone)]
pub struct TelephonyClient {
    config: TelephonyConfig,
    http: reqwest::Client,
}

impl TelephonyClient {
    pub fn new(config: TelephonyConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// True when credentials are present. Dispatch endpoints refuse to run
    /// without them rather than placing anonymous requests.
    pub fn is_configured(&self) -> bool {
        !self.config.account_sid.is_empty()
            && !self.config.auth_token.is_empty()
            && !self.config.from_number.is_empty()
    }

    /// Places one outbound call whose answer event will hit `webhook_url`.
    /// Returns the provider-assigned call SID.
    pub async fn place_call(&self, to: &str, webhook_url: &str) -> Result<String, TelephonyError> {
        if !self.is_configured() {
            return Err(TelephonyError::NotConfigured);
        }

        let url = format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.config.api_base.trim_end_matches('/'),
            self.config.account_sid
        );

        let params = [
            ("To", to),
            ("From", self.config.from_number.as_str()),
            ("Url", webhook_url),
            ("Method", "POST"),
        ];

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| TelephonyError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelephonyError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CreateCallResponse = response
            .json()
            .await
            .map_err(|e| TelephonyError::Request(format!("malformed response: {}", e)))?;
        Ok(parsed.sid)
    }
}

/// Downloads caller recordings from the provider's media URLs.
#[derive(Debug, Clone)]
pub struct RecordingFetcher {
    account_sid: String,
    auth_token: String,
    http: reqwest::Client,
}

impl RecordingFetcher {
    pub fn new(account_sid: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Fetches recording bytes.
    ///
    /// Provider media URLs are bare resource paths; the actual audio lives
    /// at format-suffixed variants, so `.wav`, `.mp3`, and `?Download=true`
    /// are tried in order. Non-provider URLs are fetched as-is.
    pub async fn fetch(&self, recording_url: &str) -> Result<Vec<u8>, TelephonyError> {
        let is_provider = recording_url.contains("api.twilio.com");
        let candidates = if is_provider {
            vec![
                format!("{recording_url}.wav"),
                format!("{recording_url}.mp3"),
                format!("{recording_url}?Download=true"),
            ]
        } else {
            vec![recording_url.to_string()]
        };

        let mut last_error = String::from("no candidate URLs");
        for candidate in candidates {
            let mut request = self
                .http
                .get(&candidate)
                .header("Accept", "audio/wav, audio/mpeg, */*");
            if is_provider && !self.account_sid.is_empty() {
                request = request.basic_auth(&self.account_sid, Some(&self.auth_token));
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    return response
                        .bytes()
                        .await
                        .map(|b| b.to_vec())
                        .map_err(|e| TelephonyError::Download(e.to_string()));
                }
                Ok(response) => {
                    last_error = format!("{} from {}", response.status(), candidate);
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
        }

        Err(TelephonyError::Download(last_error))
    }
}
