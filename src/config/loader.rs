//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::GuardConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GuardConfig, ConfigError> {
    let config: GuardConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GuardConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_config(Path::new("does-not-exist.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_invalid_values_collect_every_error() {
        let err = parse_config(
            r#"
            [degrade]
            threshold = 1.5
            panic_threshold = 0.0
            "#,
        )
        .unwrap_err();
        match err {
            ConfigError::Validation(errors) => assert!(errors.len() >= 2),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join("upstream_guard_loader_test.toml");
        fs::write(
            &path,
            r#"
            [[services]]
            name = "orders"
            nodes = [{ host = "127.0.0.1", port = 9000, weight = 5 }]
            "#,
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.services[0].nodes[0].weight, 5);
        fs::remove_file(&path).unwrap_or_default();
    }
}
