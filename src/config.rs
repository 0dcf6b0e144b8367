//! Configuration management for AlertRelay
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses the `figment`
//! crate to layer built-in defaults, a YAML file, environment variables and
//! command-line overrides.

use crate::cli::Cli;
use crate::core::ProviderKind;
use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RETRY_COUNT: u32 = 3;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("webhook_url must be configured for enabled webhook '{0}'")]
    MissingWebhookUrl(ProviderKind),

    #[error("template must be configured for enabled webhook '{0}'")]
    MissingTemplate(ProviderKind),

    #[error("unknown template timezone '{0}'")]
    UnknownTimezone(String),

    #[error("unsupported logging format '{0}' (expected 'text' or 'json')")]
    UnknownLogFormat(String),
}

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub template: TemplateConfig,
    pub webhooks: WebhooksConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Settings for the inbound HTTP server.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// The TCP port to listen on.
    pub port: u16,
    /// Upper bound on handling a single inbound request.
    #[serde(with = "duration")]
    pub timeout: Duration,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// The default tracing filter, e.g. `info` or `alertrelay=debug`.
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TemplateConfig {
    /// IANA time-zone used by the `local_time` template filter.
    pub timezone: String,
}

impl TemplateConfig {
    /// Parses the configured IANA time-zone identifier.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse()
            .map_err(|_| ConfigError::UnknownTimezone(self.timezone.clone()))
    }
}

/// Per-backend settings, one block per supported provider.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct WebhooksConfig {
    #[serde(default)]
    pub feishu: ProviderConfig,
    #[serde(default)]
    pub dingding: ProviderConfig,
    #[serde(default)]
    pub weixin: ProviderConfig,
}

impl WebhooksConfig {
    pub fn get(&self, kind: ProviderKind) -> &ProviderConfig {
        match kind {
            ProviderKind::Feishu => &self.feishu,
            ProviderKind::Dingding => &self.dingding,
            ProviderKind::Weixin => &self.weixin,
        }
    }

    fn get_mut(&mut self, kind: ProviderKind) -> &mut ProviderConfig {
        match kind {
            ProviderKind::Feishu => &mut self.feishu,
            ProviderKind::Dingding => &mut self.dingding,
            ProviderKind::Weixin => &mut self.weixin,
        }
    }

    /// Iterates over the enabled providers in a fixed order.
    pub fn enabled(&self) -> impl Iterator<Item = (ProviderKind, &ProviderConfig)> {
        ProviderKind::ALL
            .into_iter()
            .map(move |kind| (kind, self.get(kind)))
            .filter(|(_, provider)| provider.enable)
    }
}

/// Configuration for a single notification backend.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProviderConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub webhook_url: String,
    /// Shared secret for signature-based backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Timeout applied to each delivery attempt.
    #[serde(default = "default_provider_timeout", with = "duration")]
    pub timeout: Duration,
    /// Number of attempts per message envelope.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Path to the template file for this backend.
    #[serde(default)]
    pub template: PathBuf,
}

impl ProviderConfig {
    /// Returns the secret only when it is set to a non-empty value.
    pub fn signing_secret(&self) -> Option<&str> {
        self.secret.as_deref().filter(|secret| !secret.is_empty())
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enable: false,
            webhook_url: String::new(),
            secret: None,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
            template: PathBuf::new(),
        }
    }
}

fn default_provider_timeout() -> Duration {
    DEFAULT_PROVIDER_TIMEOUT
}

fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}

/// Exposes a Prometheus scrape endpoint on the main server.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
}

impl Config {
    /// Loads the application configuration.
    ///
    /// Sources are layered in increasing priority: built-in defaults, the
    /// YAML file named by the CLI (or `config/config.yaml`), environment
    /// variables prefixed with `ALERTRELAY_` (`__` separates nested keys),
    /// and finally explicit command-line flags.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }

        let mut config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("ALERTRELAY_").split("__"))
            .merge(cli.clone())
            .extract()
            .map_err(Box::new)?;

        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Replaces explicit zero values with the documented defaults.
    pub fn apply_defaults(&mut self) {
        if self.server.timeout.is_zero() {
            self.server.timeout = DEFAULT_SERVER_TIMEOUT;
        }
        if self.logging.level.is_empty() {
            self.logging.level = "info".to_string();
        }
        if self.logging.format.is_empty() {
            self.logging.format = "text".to_string();
        }
        if self.template.timezone.is_empty() {
            self.template.timezone = "Asia/Shanghai".to_string();
        }
        for kind in ProviderKind::ALL {
            let provider = self.webhooks.get_mut(kind);
            if provider.timeout.is_zero() {
                provider.timeout = DEFAULT_PROVIDER_TIMEOUT;
            }
            if provider.retry_count == 0 {
                provider.retry_count = DEFAULT_RETRY_COUNT;
            }
        }
    }

    /// Checks invariants that must hold before the server starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (kind, provider) in self.webhooks.enabled() {
            if provider.webhook_url.trim().is_empty() {
                return Err(ConfigError::MissingWebhookUrl(kind));
            }
            if provider.template.as_os_str().is_empty() {
                return Err(ConfigError::MissingTemplate(kind));
            }
        }

        self.template.tz()?;

        match self.logging.format.as_str() {
            "text" | "json" => Ok(()),
            other => Err(ConfigError::UnknownLogFormat(other.to_string())),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 8080,
                timeout: DEFAULT_SERVER_TIMEOUT,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
            template: TemplateConfig {
                timezone: "Asia/Shanghai".to_string(),
            },
            webhooks: WebhooksConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Serde helpers for durations written as `30`, `"30s"`, `"500ms"` or `"1m30s"`.
pub mod duration {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if value.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", value.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", value.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse(&text).map_err(de::Error::custom),
        }
    }

    /// Parses a duration string made of `<number><unit>` segments.
    pub fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Duration::ZERO);
        }
        if let Ok(secs) = text.parse::<u64>() {
            return Ok(Duration::from_secs(secs));
        }

        let mut total = Duration::ZERO;
        let mut rest = text;
        while !rest.is_empty() {
            let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
            if digits == 0 {
                return Err(format!("invalid duration '{text}'"));
            }
            let amount: u64 = rest[..digits]
                .parse()
                .map_err(|_| format!("invalid duration '{text}'"))?;
            rest = &rest[digits..];

            let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
            let segment = match &rest[..unit_len] {
                "ms" => Duration::from_millis(amount),
                "s" => Duration::from_secs(amount),
                "m" => Duration::from_secs(amount * 60),
                "h" => Duration::from_secs(amount * 3600),
                unit => return Err(format!("unknown duration unit '{unit}' in '{text}'")),
            };
            total += segment;
            rest = &rest[unit_len..];
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_provider() -> ProviderConfig {
        ProviderConfig {
            enable: true,
            webhook_url: "https://open.feishu.cn/hook/abc".to_string(),
            template: PathBuf::from("templates/feishu.tmpl"),
            ..Default::default()
        }
    }

    #[test]
    fn test_duration_parse() {
        assert_eq!(duration::parse("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(duration::parse("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(duration::parse("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(duration::parse("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(duration::parse("15").unwrap(), Duration::from_secs(15));
        assert!(duration::parse("10 parsecs").is_err());
        assert!(duration::parse("s").is_err());
    }

    #[test]
    fn test_validate_accepts_disabled_provider_without_url() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_enabled_provider_without_url() {
        let mut config = Config::default();
        config.webhooks.dingding = ProviderConfig {
            webhook_url: String::new(),
            ..enabled_provider()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingWebhookUrl(ProviderKind::Dingding))
        ));
    }

    #[test]
    fn test_validate_rejects_enabled_provider_without_template() {
        let mut config = Config::default();
        config.webhooks.weixin = ProviderConfig {
            template: PathBuf::new(),
            ..enabled_provider()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingTemplate(ProviderKind::Weixin))
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_timezone() {
        let mut config = Config::default();
        config.template.timezone = "Mars/Olympus_Mons".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownTimezone(_))
        ));
    }

    #[test]
    fn test_apply_defaults_replaces_zero_values() {
        let mut config = Config::default();
        config.webhooks.feishu.retry_count = 0;
        config.webhooks.feishu.timeout = Duration::ZERO;
        config.server.timeout = Duration::ZERO;
        config.apply_defaults();
        assert_eq!(config.webhooks.feishu.retry_count, 3);
        assert_eq!(config.webhooks.feishu.timeout, Duration::from_secs(10));
        assert_eq!(config.server.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_enabled_iterates_in_fixed_order() {
        let mut config = Config::default();
        config.webhooks.weixin = enabled_provider();
        config.webhooks.feishu = enabled_provider();
        let kinds: Vec<_> = config.webhooks.enabled().map(|(kind, _)| kind).collect();
        assert_eq!(kinds, vec![ProviderKind::Feishu, ProviderKind::Weixin]);
    }
}
