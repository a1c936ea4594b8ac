use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;
use url::Url;

use crate::error::{Error, ErrorDetails};
use crate::pricing::PricingConfig;
use crate::refine::SamplingSettings;
use crate::telemetry::batcher::DEFAULT_CHANNEL_CAPACITY;

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub bind_address: Option<SocketAddr>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_upgrade_url")]
    pub upgrade_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: None,
            debug: false,
            allowed_origins: default_allowed_origins(),
            upgrade_url: default_upgrade_url(),
        }
    }
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "https://refinebacklog.com".to_string(),
        "https://www.refinebacklog.com".to_string(),
    ]
}

fn default_upgrade_url() -> String {
    "https://refinebacklog.com/pricing".to_string()
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct ModelConfig {
    pub name: String,
    pub api_base: Url,
    pub temperature: f32,
    pub retry_temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        #[expect(clippy::expect_used)]
        let api_base = Url::parse("https://api.anthropic.com/v1/").expect("default api_base is a valid URL");
        Self {
            name: "claude-haiku-4-5-20250414".to_string(),
            api_base,
            temperature: 0.3,
            retry_temperature: 0.1,
            max_tokens: 4096,
            timeout_secs: 60,
        }
    }
}

impl ModelConfig {
    pub fn sampling(&self) -> SamplingSettings {
        SamplingSettings {
            temperature: self.temperature,
            retry_temperature: self.retry_temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// The Messages API endpoint under `api_base`.
    pub fn messages_url(&self) -> Result<Url, Error> {
        self.api_base.join("messages").map_err(|e| {
            config_error(format!(
                "`model.api_base` cannot be joined with `messages` ({}): {e}",
                self.api_base
            ))
        })
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct TelemetryConfig {
    pub channel_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    pub async fn load_and_verify_from_path(config_path: &Path) -> Result<Config, Error> {
        let contents = tokio::fs::read_to_string(config_path).await.map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!(
                    "Failed to read config file `{}`: {e}",
                    config_path.display()
                ),
            })
        })?;
        let config = Self::parse(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Config, Error> {
        let deserializer = toml::Deserializer::new(contents);
        serde_path_to_error::deserialize(deserializer).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to parse config: {e}"),
            })
        })
    }

    pub fn validate(&self) -> Result<(), Error> {
        let model = &self.model;
        if model.name.trim().is_empty() {
            return Err(config_error("`model.name` must not be empty"));
        }
        for (field, value) in [
            ("temperature", model.temperature),
            ("retry_temperature", model.retry_temperature),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(config_error(format!(
                    "`model.{field}` must be between 0 and 1, got {value}"
                )));
            }
        }
        if model.retry_temperature > model.temperature {
            return Err(config_error(format!(
                "`model.retry_temperature` ({}) must not exceed `model.temperature` ({})",
                model.retry_temperature, model.temperature
            )));
        }
        if model.max_tokens == 0 {
            return Err(config_error("`model.max_tokens` must be greater than 0"));
        }
        if model.timeout_secs == 0 {
            return Err(config_error("`model.timeout_secs` must be greater than 0"));
        }
        model.messages_url()?;
        if self.telemetry.channel_capacity == 0 {
            return Err(config_error("`telemetry.channel_capacity` must be greater than 0"));
        }
        Url::parse(&self.gateway.upgrade_url).map_err(|e| {
            config_error(format!(
                "`gateway.upgrade_url` is not a valid URL ({}): {e}",
                self.gateway.upgrade_url
            ))
        })?;
        self.pricing.validate()
    }
}

fn config_error(message: impl Into<String>) -> Error {
    Error::new(ErrorDetails::Config {
        message: message.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FULL_CONFIG: &str = r#"
[gateway]
bind_address = "127.0.0.1:8080"
debug = true
allowed_origins = ["https://refinebacklog.com"]
upgrade_url = "https://refinebacklog.com/pricing"

[model]
name = "claude-3-5-haiku-20241022"
api_base = "https://api.anthropic.com/v1/"
temperature = 0.3
retry_temperature = 0.1
max_tokens = 2048
timeout_secs = 30

[pricing.models."claude-3-5-haiku-20241022"]
input = 0.80
output = 4.00

[telemetry]
channel_capacity = 64
"#;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.model.name, "claude-haiku-4-5-20250414");
        assert_eq!(config.model.temperature, 0.3);
        assert_eq!(config.model.retry_temperature, 0.1);
        assert_eq!(config.gateway.upgrade_url, "https://refinebacklog.com/pricing");
        assert_eq!(config.gateway.allowed_origins.len(), 2);
        assert_eq!(config.telemetry.channel_capacity, 1024);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[tokio::test]
    async fn test_load_full_config_from_path() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(FULL_CONFIG.as_bytes()).unwrap();

        let config = Config::load_and_verify_from_path(file.path()).await.unwrap();
        assert_eq!(
            config.gateway.bind_address,
            Some("127.0.0.1:8080".parse().unwrap())
        );
        assert!(config.gateway.debug);
        assert_eq!(config.model.max_tokens, 2048);
        assert_eq!(config.telemetry.channel_capacity, 64);
        assert_eq!(config.pricing.models["claude-3-5-haiku-20241022"].input, 0.80);
    }

    #[tokio::test]
    async fn test_missing_file_is_config_error() {
        let err = Config::load_and_verify_from_path(Path::new("/nonexistent/refine.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err.get_details(), ErrorDetails::Config { .. }));
    }

    #[test]
    fn test_unknown_fields_are_rejected_with_path() {
        let err = Config::parse("[model]\ntemprature = 0.5\n").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("model"), "{message}");
        assert!(message.contains("temprature"), "{message}");
    }

    #[test]
    fn test_sampling_bounds() {
        let invalid = [
            "[model]\ntemperature = 1.5\n",
            "[model]\ntemperature = -0.1\nretry_temperature = 0.0\n",
            "[model]\ntemperature = 0.2\nretry_temperature = 0.5\n",
            "[model]\nmax_tokens = 0\n",
            "[telemetry]\nchannel_capacity = 0\n",
            "[gateway]\nupgrade_url = \"not a url\"\n",
        ];
        for contents in invalid {
            let config = Config::parse(contents).unwrap();
            assert!(config.validate().is_err(), "{contents} should be rejected");
        }
    }

    #[test]
    fn test_model_api_base_must_accept_messages_path() {
        let config = Config::default();
        assert_eq!(
            config.model.messages_url().unwrap().as_str(),
            "https://api.anthropic.com/v1/messages"
        );

        let config = Config::parse("[model]\napi_base = \"mailto:ops@example.com\"\n").unwrap();
        let err = config.validate().unwrap_err();
        match err.get_details() {
            ErrorDetails::Config { message } => assert!(message.contains("model.api_base")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_negative_pricing_is_rejected() {
        let config =
            Config::parse("[pricing.models.\"x\"]\ninput = -1.0\noutput = 1.0\n").unwrap();
        assert!(config.validate().is_err());
    }
}
