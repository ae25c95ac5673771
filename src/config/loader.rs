//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ConfigIssue};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_issues(.0))]
    Validation(Vec<ConfigIssue>),
}

fn join_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(
            r#"
            [security]
            token_secret = "a-long-enough-secret-value"
            "#,
        )
        .unwrap();
        assert_eq!(config.rate_limit.limit, 10);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.security.default_capability, "manage_options");
    }

    #[test]
    fn test_users_section() {
        let config = parse_config(
            r#"
            [security]
            token_secret = "a-long-enough-secret-value"

            [[users]]
            id = 1
            session = "s-1"
            capabilities = ["manage_options"]
            "#,
        )
        .unwrap();
        assert_eq!(config.users.len(), 1);
        assert_eq!(config.users[0].capabilities, vec!["manage_options"]);
    }

    #[test]
    fn test_invalid_config_reports_all_issues() {
        let err = parse_config(
            r#"
            [rate_limit]
            limit = 0
            window_secs = 0
            "#,
        )
        .unwrap_err();
        match err {
            ConfigError::Validation(issues) => assert_eq!(issues.len(), 2),
            other => panic!("unexpected error: {}", other),
        }
    }
}
