mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub use loader::load_config;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub variants: Vec<VariantConfig>,
}

/// Proxy server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

/// Upstream inference API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Full upstream URL (e.g., "https://api.example.com" or "http://localhost:8080")
    pub url: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// TLS configuration options
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// API key for upstream authentication
    #[serde(default)]
    pub api_key: Option<String>,
}

/// TLS configuration for upstream connections
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Accept invalid certificates (self-signed, expired)
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Path to custom CA certificate (PEM format)
    pub ca_cert_path: Option<String>,
    /// Path to client certificate for mTLS
    pub client_cert_path: Option<String>,
    /// Path to client private key for mTLS
    pub client_key_path: Option<String>,
}

fn default_timeout() -> u64 {
    300
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            timeout_seconds: default_timeout(),
            tls: None,
            api_key: None,
        }
    }
}

impl UpstreamConfig {
    /// Returns the base URL with trailing slash stripped
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// Returns true if the URL uses HTTPS
    pub fn is_tls(&self) -> bool {
        self.url.to_lowercase().starts_with("https://")
    }
}

/// One variant entry from the config file: a named bundle of transformations
/// selectable via `model@label` or a regex over the model identifier.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VariantConfig {
    pub name: String,
    /// Suffix after `@` in the client model identifier that selects this variant
    #[serde(default)]
    pub label: String,
    /// Regex tried against the full model identifier when no label matches
    #[serde(default)]
    pub model_regex: String,
    /// Text appended verbatim to the last message of the request
    #[serde(default)]
    pub inject_at_end: String,
    /// Parameters applied only when the client did not supply them
    #[serde(default)]
    pub weak_defaults: HashMap<String, serde_json::Value>,
    /// Logit-bias entries applied only for tokens the client did not bias
    #[serde(default)]
    pub weak_logit_bias: Vec<LogitBiasEntry>,
    #[serde(default)]
    pub thinking: ThinkingConfig,
    /// Plain text file whose content is prepended as a system prompt
    #[serde(default)]
    pub system_prompt_file: Option<PathBuf>,
}

/// Think-tag section of a variant. Tags left unset fall back to the
/// environment-sourced defaults resolved at startup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ThinkingConfig {
    #[serde(default)]
    pub strip: bool,
    #[serde(default)]
    pub start_tag: Option<String>,
    #[serde(default)]
    pub end_tag: Option<String>,
}

/// A single weak logit-bias entry (token id → bias)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogitBiasEntry {
    pub token: String,
    pub bias: f64,
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        load_config(path)
    }

    /// Load configuration with fallback to default path
    pub fn load_or_default(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        match config_path {
            Some(path) => Self::from_file(path),
            None => {
                // Try default locations
                let default_paths = ["config.yaml", "config.yml", "./config/config.yaml"];
                for p in default_paths {
                    let path = Path::new(p);
                    if path.exists() {
                        return Self::from_file(path);
                    }
                }
                Err(ConfigError::NotFound(
                    "No config file found. Tried: config.yaml, config.yml, ./config/config.yaml"
                        .to_string(),
                ))
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_config_base_url() {
        let config = UpstreamConfig {
            url: "http://localhost:8080".to_string(),
            ..UpstreamConfig::default()
        };
        assert_eq!(config.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_upstream_config_trailing_slash() {
        let config = UpstreamConfig {
            url: "http://localhost:8080/".to_string(),
            ..UpstreamConfig::default()
        };
        assert_eq!(config.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_upstream_config_is_tls() {
        let http_config = UpstreamConfig::default();
        assert!(!http_config.is_tls());

        let https_config = UpstreamConfig {
            url: "https://secure.example.com".to_string(),
            ..UpstreamConfig::default()
        };
        assert!(https_config.is_tls());
    }

    #[test]
    fn test_upstream_config_default() {
        let config = UpstreamConfig::default();
        assert_eq!(config.url, "http://localhost:8080");
        assert_eq!(config.timeout_seconds, 300);
        assert!(config.tls.is_none());
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_upstream_config_tls_options() {
        let config = UpstreamConfig {
            url: "https://secure.example.com".to_string(),
            tls: Some(TlsConfig {
                accept_invalid_certs: true,
                ca_cert_path: Some("/path/to/ca.pem".to_string()),
                client_cert_path: None,
                client_key_path: None,
            }),
            ..UpstreamConfig::default()
        };
        let tls = config.tls.unwrap();
        assert!(tls.accept_invalid_certs);
        assert_eq!(tls.ca_cert_path, Some("/path/to/ca.pem".to_string()));
    }

    #[test]
    fn test_variant_config_minimal_yaml() {
        let yaml = r#"
name: passthrough-ish
"#;
        let cfg: VariantConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.name, "passthrough-ish");
        assert!(cfg.label.is_empty());
        assert!(cfg.model_regex.is_empty());
        assert!(cfg.inject_at_end.is_empty());
        assert!(cfg.weak_defaults.is_empty());
        assert!(cfg.weak_logit_bias.is_empty());
        assert!(!cfg.thinking.strip);
        assert!(cfg.thinking.start_tag.is_none());
        assert!(cfg.system_prompt_file.is_none());
    }

    #[test]
    fn test_variant_config_full_yaml() {
        let yaml = r#"
name: reasoning-clean
label: clean
model_regex: "deepseek-r1.*"
inject_at_end: " /no_think"
weak_defaults:
  temperature: 0.6
  top_p: 0.95
weak_logit_bias:
  - token: "12345"
    bias: -100.0
thinking:
  strip: true
  start_tag: "<think>"
  end_tag: "</think>"
system_prompt_file: prompts/clean.txt
"#;
        let cfg: VariantConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.label, "clean");
        assert_eq!(cfg.weak_defaults["temperature"], serde_json::json!(0.6));
        assert_eq!(cfg.weak_logit_bias.len(), 1);
        assert_eq!(cfg.weak_logit_bias[0].token, "12345");
        assert_eq!(cfg.weak_logit_bias[0].bias, -100.0);
        assert!(cfg.thinking.strip);
        assert_eq!(cfg.thinking.start_tag.as_deref(), Some("<think>"));
        assert_eq!(
            cfg.system_prompt_file,
            Some(PathBuf::from("prompts/clean.txt"))
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::NotFound("test.yaml".to_string());
        assert!(err.to_string().contains("test.yaml"));

        let err = ConfigError::Validation("invalid regex".to_string());
        assert!(err.to_string().contains("invalid regex"));
    }

    #[test]
    fn test_load_or_default_with_path() {
        let result = AppConfig::load_or_default(Some(Path::new("/nonexistent/config.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_server_config() {
        let config = ServerConfig {
            port: 8099,
            host: "0.0.0.0".to_string(),
        };
        assert_eq!(config.port, 8099);
        assert_eq!(config.host, "0.0.0.0");
    }
}
