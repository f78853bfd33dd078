//! Client configuration for a text-generation-inference endpoint.
//!
//! The base URL is resolved once, when the configuration is built: an
//! explicit value wins, then the `TGI_URL` environment variable, otherwise
//! construction fails.

use hfchat::error::LLMError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Environment variable holding the default endpoint.
pub const TGI_URL_ENV: &str = "TGI_URL";

/// Request timeout used when none is configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Picks the endpoint: `explicit`, then `env`, else a configuration error.
///
/// The returned URL always ends with `/` so route names can be joined onto it.
pub fn resolve_base_url(explicit: Option<&str>, env: Option<&str>) -> Result<Url, LLMError> {
    let raw = explicit.or(env).ok_or_else(|| {
        LLMError::ConfigurationError(format!(
            "No {} environment variable found. Please set this to the URL of the TGI service, \
             e.g., 'http://127.0.0.1:8080', or configure a base URL explicitly.",
            TGI_URL_ENV
        ))
    })?;

    let mut url = Url::parse(raw.trim())
        .map_err(|e| LLMError::ConfigurationError(format!("Invalid base URL '{}': {}", raw, e)))?;
    if url.cannot_be_a_base() {
        return Err(LLMError::ConfigurationError(format!(
            "Invalid base URL '{}': not a hierarchical URL",
            raw
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Resolved, immutable connection settings shared by every request of one
/// client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    base_url: Url,
    headers: BTreeMap<String, String>,
    cookies: BTreeMap<String, String>,
    timeout: Duration,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Configuration taken entirely from the environment.
    pub fn from_env() -> Result<Self, LLMError> {
        Self::builder().build()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Value for the `Cookie` header, if any cookies are configured.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Unresolved settings, as they appear in configuration files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct ClientConfigBuilder {
    /// text-generation-inference instance base url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Additional headers sent with every request
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Cookies to include in the requests
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cookies: BTreeMap<String, String>,
    /// Timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl ClientConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Resolves the configuration against the process environment.
    pub fn build(self) -> Result<ClientConfig, LLMError> {
        let env = std::env::var(TGI_URL_ENV).ok();
        self.build_with_env(env.as_deref())
    }

    /// Resolves the configuration with `env` standing in for `TGI_URL`.
    pub fn build_with_env(self, env: Option<&str>) -> Result<ClientConfig, LLMError> {
        if self.base_url.is_none() && env.is_some() {
            log::info!("Using {}: {}", TGI_URL_ENV, env.unwrap_or_default());
        }
        let base_url = resolve_base_url(self.base_url.as_deref(), env)?;
        let timeout = self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout == 0 {
            return Err(LLMError::ConfigurationError(
                "timeout_seconds must be greater than zero".into(),
            ));
        }
        Ok(ClientConfig {
            base_url,
            headers: self.headers,
            cookies: self.cookies,
            timeout: Duration::from_secs(timeout),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serializes tests that touch the process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn explicit_url_wins_over_env() {
        let url = resolve_base_url(Some("http://explicit:1"), Some("http://env:2")).unwrap();
        assert_eq!(url.as_str(), "http://explicit:1/");
    }

    #[test]
    fn env_is_used_when_nothing_explicit() {
        let url = resolve_base_url(None, Some("http://env:2")).unwrap();
        assert_eq!(url.as_str(), "http://env:2/");
    }

    #[test]
    fn missing_url_is_a_configuration_error() {
        let err = resolve_base_url(None, None).unwrap_err();
        assert!(matches!(err, LLMError::ConfigurationError(_)));
        assert!(err.to_string().contains("TGI_URL"));

        let err = ClientConfig::builder().build_with_env(None).unwrap_err();
        assert!(matches!(err, LLMError::ConfigurationError(_)));
    }

    #[test]
    fn invalid_url_is_a_configuration_error() {
        let err = resolve_base_url(Some("not a url"), None).unwrap_err();
        assert!(matches!(err, LLMError::ConfigurationError(_)));
        let err = resolve_base_url(Some("mailto:someone@example.com"), None).unwrap_err();
        assert!(matches!(err, LLMError::ConfigurationError(_)));
    }

    #[test]
    fn base_path_gets_trailing_slash() {
        let url = resolve_base_url(Some("https://host/models/llama"), None).unwrap();
        assert_eq!(url.join("generate").unwrap().as_str(), "https://host/models/llama/generate");
    }

    #[test]
    fn defaults_and_cookie_header() {
        let cfg = ClientConfig::builder()
            .base_url("http://localhost:8080")
            .cookie("session", "abc")
            .cookie("a", "1")
            .header("Authorization", "Bearer t")
            .build_with_env(None)
            .unwrap();
        assert_eq!(cfg.timeout(), Duration::from_secs(10));
        assert_eq!(cfg.cookie_header().as_deref(), Some("a=1; session=abc"));
        assert_eq!(cfg.headers().get("Authorization").map(String::as_str), Some("Bearer t"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = ClientConfig::builder()
            .base_url("http://localhost:8080")
            .timeout_seconds(0)
            .build_with_env(None)
            .unwrap_err();
        assert!(matches!(err, LLMError::ConfigurationError(_)));
    }

    #[test]
    fn from_env_reads_process_environment() {
        let _guard = ENV_LOCK.lock().unwrap();
        let saved = std::env::var(TGI_URL_ENV).ok();

        unsafe { std::env::set_var(TGI_URL_ENV, "http://env-host:8080") };
        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.base_url().as_str(), "http://env-host:8080/");
        assert_eq!(config.timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));

        let explicit = ClientConfig::builder()
            .base_url("http://explicit:1")
            .build()
            .unwrap();
        assert_eq!(explicit.base_url().as_str(), "http://explicit:1/");

        unsafe { std::env::remove_var(TGI_URL_ENV) };
        let missing = ClientConfig::from_env();

        if let Some(url) = saved {
            unsafe { std::env::set_var(TGI_URL_ENV, url) };
        }
        assert!(matches!(missing, Err(LLMError::ConfigurationError(_))));
    }
}
