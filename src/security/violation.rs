//! Security violation taxonomy and severities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How bad a logged event is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of security failure the gate and scanners can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    MissingNonce,
    InvalidNonce,
    InsufficientCapability,
    InvalidReferer,
    RateLimitExceeded,
    MaliciousInput,
    SqlInjectionAttempt,
    XssAttempt,
    Unknown,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::MissingNonce => "missing_nonce",
            ViolationType::InvalidNonce => "invalid_nonce",
            ViolationType::InsufficientCapability => "insufficient_capability",
            ViolationType::InvalidReferer => "invalid_referer",
            ViolationType::RateLimitExceeded => "rate_limit_exceeded",
            ViolationType::MaliciousInput => "malicious_input",
            ViolationType::SqlInjectionAttempt => "sql_injection_attempt",
            ViolationType::XssAttempt => "xss_attempt",
            ViolationType::Unknown => "unknown",
        }
    }

    /// Fixed severity table.
    pub fn severity(&self) -> Severity {
        match self {
            ViolationType::InvalidNonce
            | ViolationType::MissingNonce
            | ViolationType::InvalidReferer => Severity::High,
            ViolationType::InsufficientCapability | ViolationType::RateLimitExceeded => {
                Severity::Medium
            }
            ViolationType::MaliciousInput
            | ViolationType::SqlInjectionAttempt
            | ViolationType::XssAttempt => Severity::Critical,
            ViolationType::Unknown => Severity::Low,
        }
    }

    /// Client-facing message. Deliberately vague about which check failed
    /// beyond what the violation type already says.
    pub fn public_message(&self) -> &'static str {
        match self {
            ViolationType::MissingNonce | ViolationType::InvalidNonce => {
                "Security check failed. Please refresh the page and try again."
            }
            ViolationType::InsufficientCapability => {
                "You do not have permission to perform this action."
            }
            ViolationType::InvalidReferer => "Request origin could not be verified.",
            ViolationType::RateLimitExceeded => "Too many requests. Please slow down.",
            ViolationType::MaliciousInput
            | ViolationType::SqlInjectionAttempt
            | ViolationType::XssAttempt => "The request contained disallowed input.",
            ViolationType::Unknown => "Security check failed.",
        }
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViolationType {
    type Err = std::convert::Infallible;

    /// Unrecognised names map to `Unknown` rather than failing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "missing_nonce" => ViolationType::MissingNonce,
            "invalid_nonce" => ViolationType::InvalidNonce,
            "insufficient_capability" => ViolationType::InsufficientCapability,
            "invalid_referer" => ViolationType::InvalidReferer,
            "rate_limit_exceeded" => ViolationType::RateLimitExceeded,
            "malicious_input" => ViolationType::MaliciousInput,
            "sql_injection_attempt" => ViolationType::SqlInjectionAttempt,
            "xss_attempt" => ViolationType::XssAttempt,
            _ => ViolationType::Unknown,
        })
    }
}

/// Limit details carried by a rate-limit rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub window_secs: u64,
}

/// A failed security check.
#[derive(Debug, Clone, Error)]
#[error("security violation: {kind}: {detail}")]
pub struct SecurityViolation {
    pub kind: ViolationType,

    /// Internal detail for logs. Never sent to clients outside debug mode.
    pub detail: String,

    /// Present when `kind` is `RateLimitExceeded`.
    pub rate_limit: Option<RateLimitInfo>,
}

impl SecurityViolation {
    pub fn new(kind: ViolationType, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            rate_limit: None,
        }
    }

    pub fn rate_limited(info: RateLimitInfo) -> Self {
        Self {
            kind: ViolationType::RateLimitExceeded,
            detail: format!(
                "more than {} requests in {} seconds",
                info.limit, info.window_secs
            ),
            rate_limit: Some(info),
        }
    }

    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_table() {
        assert_eq!(ViolationType::InvalidNonce.severity(), Severity::High);
        assert_eq!(ViolationType::MissingNonce.severity(), Severity::High);
        assert_eq!(ViolationType::InvalidReferer.severity(), Severity::High);
        assert_eq!(
            ViolationType::InsufficientCapability.severity(),
            Severity::Medium
        );
        assert_eq!(ViolationType::RateLimitExceeded.severity(), Severity::Medium);
        assert_eq!(ViolationType::MaliciousInput.severity(), Severity::Critical);
        assert_eq!(
            ViolationType::SqlInjectionAttempt.severity(),
            Severity::Critical
        );
        assert_eq!(ViolationType::XssAttempt.severity(), Severity::Critical);
        assert_eq!(ViolationType::Unknown.severity(), Severity::Low);
    }

    #[test]
    fn test_parse_round_trips_names() {
        for kind in [
            ViolationType::MissingNonce,
            ViolationType::InvalidNonce,
            ViolationType::InsufficientCapability,
            ViolationType::InvalidReferer,
            ViolationType::RateLimitExceeded,
            ViolationType::MaliciousInput,
            ViolationType::SqlInjectionAttempt,
            ViolationType::XssAttempt,
        ] {
            assert_eq!(kind.as_str().parse::<ViolationType>().unwrap(), kind);
        }
        assert_eq!(
            "something_else".parse::<ViolationType>().unwrap(),
            ViolationType::Unknown
        );
    }

    #[test]
    fn test_serde_names_match_as_str() {
        let json = serde_json::to_value(ViolationType::InsufficientCapability).unwrap();
        assert_eq!(json, "insufficient_capability");
        assert!(Severity::Critical > Severity::High);
    }
}
