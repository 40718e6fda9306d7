//! Configuration module for the X-Road subsystem controller
//!
//! All settings are explicit and handed to the API client and the lifecycle
//! adapter at construction time. Values come from defaults, an optional config
//! file and `XROAD_`-prefixed environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::poll::PollPolicy;

/// Main configuration structure for the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Security server host name
    pub api_host: String,
    /// Security server admin API port (default: 4000)
    pub api_port: u16,
    /// URL scheme of the admin API (default: https)
    pub api_scheme: String,
    /// Path prefix of the REST API (default: /api/v1)
    pub api_base_path: String,
    /// Name of the secret holding the API key (default: xroad-api-key)
    pub secret_id: String,
    /// Delay between status polls in milliseconds (default: 10000)
    pub poll_interval_ms: u64,
    /// Status polls before giving up (default: 30)
    pub poll_max_attempts: u32,
    /// Timeout of a single HTTP request in seconds (default: 30)
    pub request_timeout_secs: u64,
    /// Accept self-signed security server certificates (default: false)
    pub accept_invalid_certs: bool,
    /// Time kept in reserve before the invocation deadline (default: 5000)
    pub report_margin_ms: u64,
    /// Values applied to every service update
    pub service_defaults: ServiceDefaults,
    /// Secret store configuration
    pub secrets: SecretsConfig,
    /// Logging configuration
    pub observability: ObservabilityConfig,
}

/// Settings applied when pointing a service at its endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefaults {
    /// Service timeout in seconds (default: 60)
    pub timeout: u32,
    /// Require TLS client authentication towards the endpoint (default: false)
    pub ssl_auth: bool,
}

/// Parameters and Secrets extension configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Extension host (default: localhost)
    pub endpoint_host: String,
    /// Extension port (default: 2773)
    pub extension_port: u16,
    /// Session token presented to the extension
    #[serde(default)]
    pub session_token: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log format (json, pretty, compact)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            api_host: String::new(),
            api_port: 4000,
            api_scheme: "https".to_string(),
            api_base_path: "/api/v1".to_string(),
            secret_id: "xroad-api-key".to_string(),
            poll_interval_ms: 10_000,
            poll_max_attempts: 30,
            request_timeout_secs: 30,
            accept_invalid_certs: false,
            report_margin_ms: 5_000,
            service_defaults: ServiceDefaults::default(),
            secrets: SecretsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for ServiceDefaults {
    fn default() -> Self {
        Self {
            timeout: 60,
            ssl_auth: false,
        }
    }
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            endpoint_host: "localhost".to_string(),
            extension_port: 2773,
            session_token: None,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let mut cfg = config::Config::builder()
            .set_default("api_host", "")?
            .set_default("api_port", 4000)?
            .set_default("api_scheme", "https")?
            .set_default("api_base_path", "/api/v1")?
            .set_default("secret_id", "xroad-api-key")?
            .set_default("poll_interval_ms", 10_000)?
            .set_default("poll_max_attempts", 30)?
            .set_default("request_timeout_secs", 30)?
            .set_default("accept_invalid_certs", false)?
            .set_default("report_margin_ms", 5_000)?
            .set_default("service_defaults.timeout", 60)?
            .set_default("service_defaults.ssl_auth", false)?
            .set_default("secrets.endpoint_host", "localhost")?
            .set_default("secrets.extension_port", 2773)?
            .set_default("observability.log_level", "info")?
            .set_default("observability.log_format", "json")?;

        // Load from optional config file
        if let Ok(config_path) = std::env::var("XROAD_CONFIG_FILE") {
            cfg = cfg.add_source(config::File::with_name(&config_path).required(false));
        }

        cfg = cfg.add_source(
            config::Environment::with_prefix("XROAD")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: Self = cfg.build()?.try_deserialize()?;
        if config.secrets.session_token.is_none() {
            config.secrets.session_token = std::env::var("AWS_SESSION_TOKEN").ok();
        }
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.api_host.trim().is_empty() {
            return Err("X-Road API host is required (XROAD_API_HOST)".to_string());
        }

        if self.api_port == 0 {
            return Err("X-Road API port cannot be 0".to_string());
        }

        if self.secret_id.trim().is_empty() {
            return Err("Secret id of the X-Road API key cannot be empty".to_string());
        }

        if self.poll_interval_ms == 0 {
            return Err("Poll interval must be greater than 0".to_string());
        }

        if self.poll_max_attempts == 0 {
            return Err("Poll attempts must be greater than 0".to_string());
        }

        self.api_base_url()
            .map_err(|e| format!("Invalid X-Road API URL: {}", e))?;

        Ok(())
    }

    /// Base URL of the REST API, e.g. `https://ss.example:4000/api/v1`
    pub fn api_base_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&format!(
            "{}://{}:{}{}",
            self.api_scheme, self.api_host, self.api_port, self.api_base_path
        ))
    }

    /// Base URL of the secrets extension
    pub fn secrets_base_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&format!(
            "http://{}:{}/",
            self.secrets.endpoint_host, self.secrets.extension_port
        ))
    }

    /// Polling policy for registration state changes
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.poll_max_attempts,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn report_margin(&self) -> Duration {
        Duration::from_millis(self.report_margin_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ControllerConfig {
        ControllerConfig {
            api_host: "ss.example.internal".to_string(),
            ..ControllerConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.api_port, 4000);
        assert_eq!(config.poll_interval_ms, 10_000);
        assert_eq!(config.secret_id, "xroad-api-key");
        assert_eq!(config.service_defaults.timeout, 60);
        assert!(!config.service_defaults.ssl_auth);
        assert_eq!(config.secrets.extension_port, 2773);
    }

    #[test]
    fn test_config_validation() {
        let mut config = ControllerConfig::default();

        // Host is mandatory
        assert!(config.validate().is_err());

        config.api_host = "ss.example.internal".to_string();
        assert!(config.validate().is_ok());

        config.api_port = 0;
        assert!(config.validate().is_err());
        config.api_port = 4000;

        config.poll_max_attempts = 0;
        assert!(config.validate().is_err());
        config.poll_max_attempts = 3;

        config.poll_interval_ms = 0;
        assert!(config.validate().is_err());
        config.poll_interval_ms = 10;

        config.secret_id = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_base_url() {
        let config = valid_config();
        assert_eq!(
            config.api_base_url().unwrap().as_str(),
            "https://ss.example.internal:4000/api/v1"
        );
    }

    #[test]
    fn test_secrets_base_url() {
        let config = valid_config();
        assert_eq!(
            config.secrets_base_url().unwrap().as_str(),
            "http://localhost:2773/"
        );
    }

    #[test]
    fn test_poll_policy() {
        let mut config = valid_config();
        config.poll_interval_ms = 250;
        config.poll_max_attempts = 4;

        let policy = config.poll_policy();
        assert_eq!(policy.interval, Duration::from_millis(250));
        assert_eq!(policy.max_attempts, 4);
    }
}
