//! Client configuration for the sync subsystem.
//!
//! Values come from a JSON document and/or `DUKA_*` environment variables. The bearer
//! token is accepted from either source but never serialized back out.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::remote::{HttpRemote, RemoteError, RemoteResult};
use crate::util::{is_http_url, normalize_text_option};

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 15;

pub const ENV_API_URL: &str = "DUKA_API_URL";
pub const ENV_API_TOKEN: &str = "DUKA_API_TOKEN";
pub const ENV_SYNC_INTERVAL_SECS: &str = "DUKA_SYNC_INTERVAL_SECS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "DUKA_REQUEST_TIMEOUT_SECS";

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_token: Option<String>,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

const fn default_sync_interval_secs() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

const fn default_probe_interval_secs() -> u64 {
    DEFAULT_PROBE_INTERVAL_SECS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            api_token: None,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            probe_interval_secs: DEFAULT_PROBE_INTERVAL_SECS,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("api_base_url", &self.api_base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("sync_interval_secs", &self.sync_interval_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("probe_interval_secs", &self.probe_interval_secs)
            .finish()
    }
}

impl ClientConfig {
    /// Parse and validate a JSON configuration document.
    pub fn parse(payload: &str) -> Result<Self, String> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| format!("invalid client config JSON: {error}"))?;
        config.validate()
    }

    /// Defaults overlaid with `DUKA_*` environment variables.
    pub fn from_env() -> Result<Self, String> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()
    }

    /// Overlay values from an environment lookup; unset or blank variables are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), String> {
        if let Some(url) = normalize_text_option(lookup(ENV_API_URL)) {
            self.api_base_url = Some(url);
        }
        if let Some(token) = normalize_text_option(lookup(ENV_API_TOKEN)) {
            self.api_token = Some(token);
        }
        if let Some(secs) = parse_secs(lookup(ENV_SYNC_INTERVAL_SECS), ENV_SYNC_INTERVAL_SECS)? {
            self.sync_interval_secs = secs;
        }
        if let Some(secs) = parse_secs(lookup(ENV_REQUEST_TIMEOUT_SECS), ENV_REQUEST_TIMEOUT_SECS)? {
            self.request_timeout_secs = secs;
        }
        Ok(())
    }

    /// Normalize the endpoint and reject zero durations.
    pub fn validate(mut self) -> Result<Self, String> {
        self.api_base_url = match normalize_text_option(self.api_base_url.take()) {
            Some(url) if is_http_url(&url) => Some(url.trim_end_matches('/').to_string()),
            Some(_) => return Err("api_base_url must include http:// or https://".to_string()),
            None => None,
        };
        self.api_token = normalize_text_option(self.api_token.take());

        for (field, value) in [
            ("sync_interval_secs", self.sync_interval_secs),
            ("request_timeout_secs", self.request_timeout_secs),
            ("probe_interval_secs", self.probe_interval_secs),
        ] {
            if value == 0 {
                return Err(format!("{field} must be greater than zero"));
            }
        }
        Ok(self)
    }

    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    /// REST client for the configured remote authority.
    pub fn http_remote(&self) -> RemoteResult<HttpRemote> {
        let base_url = self.api_base_url.clone().ok_or_else(|| {
            RemoteError::InvalidConfiguration(format!(
                "no API endpoint configured (set {ENV_API_URL} or api_base_url)"
            ))
        })?;
        HttpRemote::new(base_url, self.api_token.clone(), self.request_timeout())
    }
}

fn parse_secs(raw: Option<String>, key: &str) -> Result<Option<u64>, String> {
    let Some(raw) = normalize_text_option(raw) else {
        return Ok(None);
    };
    raw.parse::<u64>()
        .map(Some)
        .map_err(|_| format!("{key} must be a whole number of seconds, got '{raw}'"))
}
