//! Error classification and persistence.
//!
//! # Responsibilities
//! - One entry point per error category (ajax, validation, database,
//!   security, performance, system)
//! - Derive severity from a fixed type → severity table
//! - Attach user / request / system context and redact sensitive keys
//! - Fan out to: log line, rotating file, bounded history, operator alert
//!
//! # Design Decisions
//! - Every side effect is guarded on its own; one failing never skips the rest
//! - No entry point returns an error: logging must never take a request down
//! - Redaction happens before any sink sees the record

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::{LoggingConfig, DEFAULT_ALERT_RECIPIENT};
use crate::observability::alert::Notifier;
use crate::observability::memory::memory_usage;
use crate::observability::metrics;
use crate::observability::redact::redact;
use crate::observability::rotation::RotatingFile;
use crate::security::identity::Identity;
use crate::security::violation::{Severity, ViolationType};
use crate::store::{OptionStore, RingBuffer};

/// Option holding the bounded violation history.
pub const VIOLATIONS_OPTION: &str = "gateway_security_violations";
/// Option holding the bounded error history.
pub const ERRORS_OPTION: &str = "gateway_error_history";

/// Longest message kept in the summarized history entry.
const SUMMARY_MESSAGE_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Ajax,
    Validation,
    Database,
    Security,
    Performance,
    System,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Ajax => "ajax",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Database => "database",
            ErrorCategory::Security => "security",
            ErrorCategory::Performance => "performance",
            ErrorCategory::System => "system",
        }
    }
}

/// Severity for a non-security error type. Unlisted types are medium.
pub fn error_severity(error_type: &str) -> Severity {
    match error_type {
        "fatal_error" | "database_connection_failed" | "memory_exhausted" => Severity::Critical,
        "database_query_failed" | "system_error" | "performance_degraded" => Severity::High,
        "ajax_error" | "slow_execution" => Severity::Medium,
        "validation_failed" => Severity::Low,
        _ => Severity::Medium,
    }
}

/// Who and what a log entry is about.
#[derive(Debug, Clone, Default)]
pub struct LogScope {
    pub user_id: Option<u64>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub action: Option<String>,
    pub request_id: Option<String>,
}

impl LogScope {
    pub fn for_request(identity: &Identity, action: &str, request_id: &str) -> Self {
        Self {
            user_id: Some(identity.user_id),
            ip: Some(identity.ip.clone()),
            user_agent: Some(identity.user_agent.clone()),
            action: Some(action.to_string()),
            request_id: Some(request_id.to_string()),
        }
    }

    fn to_context(&self) -> Value {
        json!({
            "user": {
                "id": self.user_id,
                "ip": self.ip,
                "user_agent": self.user_agent,
            },
            "request": {
                "action": self.action,
                "request_id": self.request_id,
            },
        })
    }
}

/// A classified, redacted error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: String,
    pub category: ErrorCategory,
    pub error_type: String,
    pub severity: Severity,
    pub message: String,
    pub timestamp: String,
    pub context: Value,
}

/// A logged security failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationRecord {
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub timestamp: String,
    pub context: Value,
}

/// Where alerts go and how they are labelled.
#[derive(Clone)]
pub struct AlertSettings {
    pub recipient: String,
    pub site_name: String,
    pub notifier: Arc<dyn Notifier>,
}

/// Classifies errors and violations and writes them to every sink.
pub struct ErrorLogger {
    file: Option<RotatingFile>,
    errors: RingBuffer,
    violations: RingBuffer,
    alerts: AlertSettings,
}

impl ErrorLogger {
    pub fn new(
        file: Option<RotatingFile>,
        options: Arc<dyn OptionStore>,
        history_capacity: usize,
        alerts: AlertSettings,
    ) -> Self {
        Self {
            file,
            errors: RingBuffer::new(options.clone(), ERRORS_OPTION, history_capacity),
            violations: RingBuffer::new(options, VIOLATIONS_OPTION, history_capacity),
            alerts,
        }
    }

    pub fn from_config(
        config: &LoggingConfig,
        options: Arc<dyn OptionStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let file = (!config.file_path.is_empty()).then(|| {
            RotatingFile::new(&config.file_path, config.max_file_bytes, config.max_rotations)
        });
        Self::new(
            file,
            options,
            config.history_capacity,
            AlertSettings {
                recipient: config.alert_email.clone(),
                site_name: config.site_name.clone(),
                notifier,
            },
        )
    }

    /// Bounded history of violations, oldest first.
    pub fn violations(&self) -> &RingBuffer {
        &self.violations
    }

    /// Bounded history of errors, oldest first.
    pub fn errors(&self) -> &RingBuffer {
        &self.errors
    }

    pub fn log_ajax_error(&self, message: &str, details: Value, scope: &LogScope) -> ErrorRecord {
        self.log_error(ErrorCategory::Ajax, "ajax_error", message, details, scope)
    }

    pub fn log_validation_error(&self, field: &str, reason: &str, scope: &LogScope) -> ErrorRecord {
        self.log_error(
            ErrorCategory::Validation,
            "validation_failed",
            &format!("{}: {}", field, reason),
            json!({ "field": field, "reason": reason }),
            scope,
        )
    }

    pub fn log_database_error(
        &self,
        operation: &str,
        message: &str,
        scope: &LogScope,
    ) -> ErrorRecord {
        self.log_error(
            ErrorCategory::Database,
            "database_query_failed",
            message,
            json!({ "operation": operation }),
            scope,
        )
    }

    /// Log an observed slowdown. Anything past twice the threshold counts as degraded.
    pub fn log_performance_issue(
        &self,
        metric: &str,
        value_ms: u64,
        threshold_ms: u64,
        scope: &LogScope,
    ) -> ErrorRecord {
        let error_type = if value_ms >= threshold_ms.saturating_mul(2) {
            "performance_degraded"
        } else {
            "slow_execution"
        };
        self.log_error(
            ErrorCategory::Performance,
            error_type,
            &format!("{} took {}ms (threshold {}ms)", metric, value_ms, threshold_ms),
            json!({ "metric": metric, "value_ms": value_ms, "threshold_ms": threshold_ms }),
            scope,
        )
    }

    pub fn log_system_error(&self, message: &str, details: Value, scope: &LogScope) -> ErrorRecord {
        self.log_error(ErrorCategory::System, "system_error", message, details, scope)
    }

    /// Log a security failure into the violation history.
    pub fn log_security_violation(
        &self,
        kind: ViolationType,
        details: Value,
        scope: &LogScope,
    ) -> ViolationRecord {
        let severity = kind.severity();
        let record = ViolationRecord {
            violation_type: kind,
            severity,
            timestamp: Utc::now().to_rfc3339(),
            context: redact(&build_context(details, scope)),
        };
        let context_json = record.context.to_string();

        tracing::warn!(
            violation = %kind,
            severity = %severity,
            context = %context_json,
            "Security violation"
        );
        metrics::record_violation(kind.as_str(), severity.as_str());

        match serde_json::to_string(&record) {
            Ok(line) => self.append_file(&line),
            Err(e) => tracing::error!(error = %e, "Failed to serialize violation record"),
        }

        match serde_json::to_value(&record) {
            Ok(entry) => {
                if let Err(e) = self.violations.push(entry) {
                    tracing::error!(error = %e, "Failed to store violation history");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize violation record"),
        }

        if severity == Severity::Critical {
            let subject = format!(
                "[{}] Critical security alert: {}",
                self.alerts.site_name, kind
            );
            let body = format!(
                "A critical security event was detected.\n\n\
                 Type: {}\nSeverity: {}\nTime: {}\n\nContext:\n{}\n",
                kind, severity, record.timestamp, context_json
            );
            self.send_alert(&subject, &body);
        }

        record
    }

    fn log_error(
        &self,
        category: ErrorCategory,
        error_type: &str,
        message: &str,
        details: Value,
        scope: &LogScope,
    ) -> ErrorRecord {
        let severity = error_severity(error_type);
        let record = ErrorRecord {
            id: format!("err_{}", Uuid::new_v4().simple()),
            category,
            error_type: error_type.to_string(),
            severity,
            message: message.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            context: redact(&build_context(details, scope)),
        };

        // (a) log sink
        let context_json = record.context.to_string();
        match severity {
            Severity::Critical | Severity::High => tracing::error!(
                record_id = %record.id,
                category = category.as_str(),
                error_type = %error_type,
                severity = %severity,
                context = %context_json,
                "{}",
                message
            ),
            _ => tracing::warn!(
                record_id = %record.id,
                category = category.as_str(),
                error_type = %error_type,
                severity = %severity,
                context = %context_json,
                "{}",
                message
            ),
        }
        metrics::record_error(category.as_str(), severity.as_str());

        // (b) rotating file
        match serde_json::to_string(&record) {
            Ok(line) => self.append_file(&line),
            Err(e) => tracing::error!(error = %e, "Failed to serialize error record"),
        }

        // (c) bounded history
        let summary = json!({
            "id": record.id,
            "category": category,
            "type": error_type,
            "severity": severity,
            "message": message.chars().take(SUMMARY_MESSAGE_CHARS).collect::<String>(),
            "timestamp": record.timestamp,
            "user_id": scope.user_id,
        });
        if let Err(e) = self.errors.push(summary) {
            tracing::error!(error = %e, "Failed to store error history");
        }

        // (d) alert
        if severity == Severity::Critical {
            let subject = format!(
                "[{}] Critical {} error: {}",
                self.alerts.site_name,
                category.as_str(),
                error_type
            );
            let body = format!(
                "A critical error was logged.\n\n\
                 Id: {}\nCategory: {}\nMessage: {}\nTime: {}\n\nContext:\n{}\n",
                record.id,
                category.as_str(),
                message,
                record.timestamp,
                context_json
            );
            self.send_alert(&subject, &body);
        }

        record
    }

    fn append_file(&self, line: &str) {
        if let Some(file) = &self.file {
            if let Err(e) = file.append_line(line) {
                tracing::error!(path = ?file.path(), error = %e, "Failed to write error log file");
            }
        }
    }

    fn send_alert(&self, subject: &str, body: &str) {
        let recipient = if self.alerts.recipient.trim().is_empty() {
            tracing::warn!(subject = %subject, "No alert recipient configured, using default");
            DEFAULT_ALERT_RECIPIENT
        } else {
            self.alerts.recipient.as_str()
        };
        match self.alerts.notifier.send(recipient, subject, body) {
            Ok(()) => metrics::record_alert("sent"),
            Err(e) => {
                metrics::record_alert("failed");
                tracing::error!(error = %e, subject = %subject, "Failed to send operator alert");
            }
        }
    }
}

fn build_context(details: Value, scope: &LogScope) -> Value {
    let memory = memory_usage();
    let mut context = scope.to_context();
    context["system"] = json!({
        "pid": std::process::id(),
        "version": env!("CARGO_PKG_VERSION"),
        "memory_usage": memory.current,
        "memory_peak": memory.peak,
    });
    context["details"] = details;
    context
}
