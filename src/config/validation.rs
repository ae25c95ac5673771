//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, capacities > 0)
//! - Reject users sharing a session value
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ConfigIssue>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ConfigIssue>> {
    let mut issues = Vec::new();

    if config.security.token_secret.len() < 16 {
        issues.push(ConfigIssue::new(
            "security.token_secret",
            "must be at least 16 bytes",
        ));
    }
    if config.security.token_lifetime_secs < 2 {
        issues.push(ConfigIssue::new(
            "security.token_lifetime_secs",
            "must be at least 2 seconds",
        ));
    }
    if config.security.expected_host.is_empty() && !config.security.local_development {
        issues.push(ConfigIssue::new(
            "security.expected_host",
            "required unless local_development is set",
        ));
    }
    if config.rate_limit.enabled {
        if config.rate_limit.limit == 0 {
            issues.push(ConfigIssue::new("rate_limit.limit", "must be greater than 0"));
        }
        if config.rate_limit.window_secs == 0 {
            issues.push(ConfigIssue::new(
                "rate_limit.window_secs",
                "must be greater than 0",
            ));
        }
    }
    if config.logging.history_capacity == 0 {
        issues.push(ConfigIssue::new(
            "logging.history_capacity",
            "must be greater than 0",
        ));
    }
    if config.logging.max_file_bytes == 0 {
        issues.push(ConfigIssue::new(
            "logging.max_file_bytes",
            "must be greater than 0",
        ));
    }
    if config.logging.alert_email.trim().is_empty() {
        issues.push(ConfigIssue::new(
            "logging.alert_email",
            "must not be empty; critical violations always alert",
        ));
    }
    if !config.logging.alert_webhook.is_empty()
        && url::Url::parse(&config.logging.alert_webhook).is_err()
    {
        issues.push(ConfigIssue::new("logging.alert_webhook", "not a valid URL"));
    }
    if config.admin.enabled && config.admin.api_key.len() < 16 {
        issues.push(ConfigIssue::new(
            "admin.api_key",
            "must be at least 16 bytes when admin is enabled",
        ));
    }

    let mut sessions = HashSet::new();
    for user in &config.users {
        if user.session.is_empty() {
            issues.push(ConfigIssue::new("users.session", "must not be empty"));
        } else if !sessions.insert(user.session.as_str()) {
            issues.push(ConfigIssue::new(
                "users.session",
                format!("duplicate session for user {}", user.id),
            ));
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::UserConfig;

    fn valid() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.security.token_secret = "0123456789abcdef".into();
        config
    }

    #[test]
    fn test_default_with_secret_is_valid() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn test_short_secret_rejected() {
        let mut config = valid();
        config.security.token_secret = "short".into();
        let issues = validate_config(&config).unwrap_err();
        assert_eq!(issues[0].field, "security.token_secret");
    }

    #[test]
    fn test_empty_alert_recipient_rejected() {
        let mut config = valid();
        config.logging.alert_email = "  ".into();
        let issues = validate_config(&config).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "logging.alert_email");
    }

    #[test]
    fn test_duplicate_sessions() {
        let mut config = valid();
        for id in [1, 2] {
            config.users.push(UserConfig {
                id,
                session: "same".into(),
                capabilities: vec![],
            });
        }
        let issues = validate_config(&config).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("duplicate"));
    }
}
