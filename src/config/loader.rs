//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {reason}")]
    Env { key: &'static str, reason: String },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Secret override.
pub const ENV_API_KEY: &str = "GATEWAY_API_KEY";
/// Listener override.
pub const ENV_BIND_ADDRESS: &str = "GATEWAY_BIND_ADDRESS";
/// Log format override.
pub const ENV_LOG_FORMAT: &str = "GATEWAY_LOG_FORMAT";

/// Load configuration from a TOML file, with environment overrides and
/// validation applied.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    load(Some(path))
}

/// Load configuration the way the binary does: optional TOML file, then
/// process environment overrides, then validation.
pub fn load(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => parse_file(path)?,
        None => GatewayConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

fn parse_file(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Apply `GATEWAY_*` overrides read through `lookup`. Empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(key) = get(ENV_API_KEY) {
        config.auth.api_key = key;
    }
    if let Some(addr) = get(ENV_BIND_ADDRESS) {
        config.listener.bind_address = addr;
    }
    if let Some(format) = get(ENV_LOG_FORMAT) {
        config.observability.log_format = format.parse().map_err(|reason| ConfigError::Env {
            key: ENV_LOG_FORMAT,
            reason,
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogFormat;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_apply() {
        let mut config = GatewayConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                (ENV_API_KEY, "from-env"),
                (ENV_BIND_ADDRESS, "127.0.0.1:9000"),
                (ENV_LOG_FORMAT, "prod"),
            ]),
        )
        .unwrap();

        assert_eq!(config.auth.api_key, "from-env");
        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let mut config = GatewayConfig::default();
        config.auth.api_key = "from-file".into();
        apply_env_overrides(&mut config, env(&[(ENV_API_KEY, "")])).unwrap();
        assert_eq!(config.auth.api_key, "from-file");
    }

    #[test]
    fn test_bad_log_format_is_reported() {
        let mut config = GatewayConfig::default();
        let err = apply_env_overrides(&mut config, env(&[(ENV_LOG_FORMAT, "xml")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { key: ENV_LOG_FORMAT, .. }));
    }

    #[test]
    fn test_load_config_from_file() {
        let path = std::env::temp_dir().join(format!("gateway-{}.toml", uuid::Uuid::new_v4()));
        fs::write(
            &path,
            "[auth]\napi_key = \"file-key\"\n\n[streaming]\npacing_ms = 20\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(config.auth.api_key, "file-key");
        assert_eq!(config.streaming.pacing_ms, 20);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let path = std::env::temp_dir().join(format!("gateway-missing-{}.toml", uuid::Uuid::new_v4()));
        assert!(matches!(load(Some(&path)), Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_rejects_empty_key() {
        let path = std::env::temp_dir().join(format!("gateway-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "[auth]\napi_key = \"\"\n").unwrap();

        let err = load_config(&path).unwrap_err();
        let _ = fs::remove_file(&path);

        match err {
            ConfigError::Validation(errors) => {
                assert_eq!(errors, vec![ValidationError::EmptyApiKey]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
