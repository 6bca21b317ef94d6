//! Configuration for the ZBD backend

use std::env;

use serde::{Deserialize, Serialize};

use crate::api::DEFAULT_API_URL;

/// API key
pub const ENV_ZBD_API_KEY: &str = "CDK_MINTD_ZBD_API_KEY";
/// API base URL
pub const ENV_ZBD_API_URL: &str = "CDK_MINTD_ZBD_API_URL";
/// Charge callback URL
pub const ENV_ZBD_CALLBACK_URL: &str = "CDK_MINTD_ZBD_CALLBACK_URL";
/// Redis URL for the paid invoice stream
pub const ENV_ZBD_REDIS_URL: &str = "CDK_MINTD_ZBD_REDIS_URL";
/// Charge expiry in seconds
pub const ENV_ZBD_INVOICE_EXPIRY: &str = "CDK_MINTD_ZBD_INVOICE_EXPIRY";
/// Request timeout in milliseconds
pub const ENV_ZBD_TIMEOUT_MS: &str = "CDK_MINTD_ZBD_TIMEOUT_MS";

/// ZBD backend settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZbdSettings {
    /// ZBD project API key
    #[serde(default)]
    pub api_key: String,
    /// API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// URL ZBD should call when a charge changes state
    #[serde(default)]
    pub callback_url: Option<String>,
    /// Redis URL for the paid invoice stream
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Seconds until a created charge expires
    /// Default is 900 seconds (15 minutes)
    #[serde(default = "default_invoice_expiry")]
    pub invoice_expiry_secs: u64,
    /// Description used when the caller provides none
    #[serde(default = "default_invoice_description")]
    pub invoice_description: String,
    /// Timeout for every API request in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_invoice_expiry() -> u64 {
    900
}

fn default_invoice_description() -> String {
    "Cashu mint deposit".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ZbdSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: default_api_url(),
            callback_url: None,
            redis_url: None,
            invoice_expiry_secs: default_invoice_expiry(),
            invoice_description: default_invoice_description(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ZbdSettings {
    /// Settings with the given API key and defaults elsewhere
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Override settings from environment variables
    pub fn from_env(mut self) -> Self {
        if let Ok(api_key) = env::var(ENV_ZBD_API_KEY) {
            self.api_key = api_key;
        }

        if let Ok(api_url) = env::var(ENV_ZBD_API_URL) {
            self.api_url = api_url;
        }

        if let Ok(callback_url) = env::var(ENV_ZBD_CALLBACK_URL) {
            self.callback_url = Some(callback_url).filter(|url| !url.is_empty());
        }

        if let Ok(redis_url) = env::var(ENV_ZBD_REDIS_URL) {
            self.redis_url = Some(redis_url).filter(|url| !url.is_empty());
        }

        if let Ok(expiry) = env::var(ENV_ZBD_INVOICE_EXPIRY) {
            if let Ok(expiry) = expiry.parse::<u64>() {
                self.invoice_expiry_secs = expiry;
            }
        }

        if let Ok(timeout) = env::var(ENV_ZBD_TIMEOUT_MS) {
            if let Ok(timeout) = timeout.parse::<u64>() {
                self.timeout_ms = timeout;
            }
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings: ZbdSettings = serde_json::from_str(r#"{"api_key":"key"}"#).unwrap();
        assert_eq!(settings.api_key, "key");
        assert_eq!(settings.api_url, "https://api.zebedee.io");
        assert_eq!(settings.invoice_expiry_secs, 900);
        assert_eq!(settings.timeout_ms, 30_000);
        assert!(settings.callback_url.is_none());
        assert!(settings.redis_url.is_none());
        assert_eq!(settings, ZbdSettings::new("key"));
    }

    #[test]
    fn test_from_env() {
        env::set_var(ENV_ZBD_API_KEY, "env_key");
        env::set_var(ENV_ZBD_CALLBACK_URL, "https://example.com/webhook");
        env::set_var(ENV_ZBD_REDIS_URL, "");
        env::set_var(ENV_ZBD_INVOICE_EXPIRY, "not a number");

        let settings = ZbdSettings::default().from_env();

        env::remove_var(ENV_ZBD_API_KEY);
        env::remove_var(ENV_ZBD_CALLBACK_URL);
        env::remove_var(ENV_ZBD_REDIS_URL);
        env::remove_var(ENV_ZBD_INVOICE_EXPIRY);

        assert_eq!(settings.api_key, "env_key");
        assert_eq!(
            settings.callback_url.as_deref(),
            Some("https://example.com/webhook")
        );
        assert!(settings.redis_url.is_none());
        assert_eq!(settings.invoice_expiry_secs, 900);
    }
}
