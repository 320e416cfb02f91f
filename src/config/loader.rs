use std::path::Path;

use super::{AppConfig, ConfigError};

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }

    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_yaml::from_str(&content)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_config() {
        let result = load_config("/nonexistent/config.yaml");
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_config_invalid_yaml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("invalid.yaml");
        std::fs::write(&path, "invalid: yaml: content: [").unwrap();

        let result = load_config(&path);
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_config_valid() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");

        let config_content = r#"
server:
  port: 8099
  host: "0.0.0.0"

upstream:
  url: "http://localhost:8080"
  timeout_seconds: 300

variants:
  - name: reasoning-clean
    label: clean
    model_regex: "deepseek-r1.*"
    thinking:
      strip: true
  - name: verbose
    label: raw
"#;
        std::fs::write(&path, config_content).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 8099);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.upstream.url, "http://localhost:8080");
        assert_eq!(config.variants.len(), 2);
        assert_eq!(config.variants[0].label, "clean");
        assert!(config.variants[0].thinking.strip);
        assert!(!config.variants[1].thinking.strip);
    }

    #[test]
    fn test_load_config_no_variants() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");

        let config_content = r#"
server:
  port: 8099
  host: "127.0.0.1"

upstream:
  url: "http://localhost:8080"
"#;
        std::fs::write(&path, config_content).unwrap();

        let config = load_config(&path).unwrap();
        assert!(config.variants.is_empty());
        assert_eq!(config.upstream.timeout_seconds, 300);
    }

    #[test]
    fn test_config_from_file() {
        let result = AppConfig::from_file("/nonexistent/path.yaml");
        assert!(result.is_err());
    }
}
