//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Capability required when a command does not name its own.
pub const DEFAULT_CAPABILITY: &str = "manage_options";

/// Root configuration for the command gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Token, capability and origin checks.
    pub security: SecurityConfig,

    /// Sliding-window rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Input validation behaviour.
    pub validation: ValidationConfig,

    /// Error/violation logging and alerting.
    pub logging: LoggingConfig,

    /// Response envelope settings.
    pub envelope: EnvelopeConfig,

    /// Performance thresholds (observational only).
    pub performance: PerformanceConfig,

    /// Durable storage locations.
    pub storage: StorageConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API.
    pub admin: AdminConfig,

    /// Known sessions for the built-in identity provider.
    pub users: Vec<UserConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            request_timeout_secs: 30,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Security gate configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Secret keying the anti-forgery tokens.
    pub token_secret: String,

    /// Token lifetime in seconds. A token stays valid for one to two half-lives.
    pub token_lifetime_secs: u64,

    /// Host (optionally with port) that Origin/Referer must name.
    pub expected_host: String,

    /// Skip the origin check. Only for local development.
    pub local_development: bool,

    /// Capability required when a command does not override it.
    pub default_capability: String,

    /// Scan raw input for script and SQL injection idioms.
    pub threat_scan: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            // WARNING: This is a placeholder! Change this in production.
            token_secret: "CHANGE_ME_IN_PRODUCTION".to_string(),
            token_lifetime_secs: 86_400,
            expected_host: "localhost:8080".to_string(),
            local_development: false,
            default_capability: DEFAULT_CAPABILITY.to_string(),
            threat_scan: true,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Maximum commands per identity and action inside one window.
    pub limit: u32,

    /// Window length in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 10,
            window_secs: 60,
        }
    }
}

/// Input validation configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ValidationConfig {
    /// Undo backslash escaping added by an upstream host before sanitizing.
    pub strip_host_escaping: bool,
}

/// Alert recipient used when none is configured.
pub const DEFAULT_ALERT_RECIPIENT: &str = "root@localhost";

/// Error logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// JSON-lines error log. Empty disables the file sink.
    pub file_path: String,

    /// Rotate once the file would exceed this many bytes.
    pub max_file_bytes: u64,

    /// Rotated files kept next to the live one.
    pub max_rotations: usize,

    /// Entries kept in each bounded history.
    pub history_capacity: usize,

    /// Recipient of critical alerts.
    pub alert_email: String,

    /// Webhook that receives alerts. Empty logs alerts instead of sending.
    pub alert_webhook: String,

    /// Site name used in alert subjects.
    pub site_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: "logs/gateway-errors.log".to_string(),
            max_file_bytes: 5 * 1024 * 1024,
            max_rotations: 5,
            history_capacity: 100,
            alert_email: DEFAULT_ALERT_RECIPIENT.to_string(),
            alert_webhook: String::new(),
            site_name: "command-gateway".to_string(),
        }
    }
}

/// Response envelope configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Version reported in every envelope.
    pub version: String,

    /// Include the `debug` block and internal error detail.
    pub debug: bool,

    /// Prefix of generated request ids.
    pub request_id_prefix: String,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            debug: false,
            request_id_prefix: "cgw".to_string(),
        }
    }
}

/// Performance thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Handler executions slower than this are logged.
    pub slow_command_ms: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            slow_command_ms: 2_000,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file holding durable options. Empty keeps options in memory.
    pub options_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            options_path: "data/options.json".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// A session known to the built-in identity provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    pub id: u64,

    /// Bearer session value presented by the client.
    pub session: String,

    #[serde(default)]
    pub capabilities: Vec<String>,
}
