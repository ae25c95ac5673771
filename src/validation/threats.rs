//! Detection of script and SQL injection attempts in raw input.
//!
//! Runs before sanitation. A hit is a security violation, not a validation
//! error: the request is refused outright and the attempt is alerted.

use std::sync::OnceLock;

use regex::{Regex, RegexSet};
use serde_json::Value;

use crate::security::violation::ViolationType;
use crate::validation::rules::FieldType;
use crate::validation::sanitizers::sanitize_key;

/// Where a threat was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreatMatch {
    pub kind: ViolationType,
    pub field: String,
}

fn xss_patterns() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            r"(?i)<\s*script\b",
            r"(?i)javascript\s*:",
            r"(?i)vbscript\s*:",
            r"(?i)<[^>]*\bon[a-z]+\s*=",
            r"(?i)<\s*iframe\b",
            r"(?i)data\s*:\s*text/html",
        ])
        .expect("static xss patterns")
    })
}

fn sql_patterns() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            r"(?i)\bunion\s+(all\s+)?select\b",
            r"(?i)'\s*or\s+'?\d+'?\s*=\s*'?\d+",
            r"(?i)'\s*or\s+'[^']*'\s*=\s*'",
            r"(?i);\s*(drop|truncate|alter)\s+table\b",
            r"(?i);\s*delete\s+from\b",
            r"(?i)\b(sleep|benchmark)\s*\(\s*\d+",
            r"(?i)\binformation_schema\b",
        ])
        .expect("static sql patterns")
    })
}

fn null_byte() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x00").expect("static null byte pattern"))
}

/// Classify one string. Rich-text fields skip the script checks because
/// their markup is sanitized rather than refused.
pub fn classify(text: &str, field_type: &FieldType) -> Option<ViolationType> {
    if sql_patterns().is_match(text) {
        return Some(ViolationType::SqlInjectionAttempt);
    }
    if *field_type != FieldType::RichText && xss_patterns().is_match(text) {
        return Some(ViolationType::XssAttempt);
    }
    if null_byte().is_match(text) {
        return Some(ViolationType::MaliciousInput);
    }
    None
}

/// Scan every string leaf of `payload`. `type_of` maps a sanitized key to
/// the field type its rule resolves to.
pub fn scan<F>(payload: &Value, type_of: F) -> Option<ThreatMatch>
where
    F: Fn(&str) -> FieldType,
{
    scan_node(payload, &FieldType::Text, "", &type_of)
}

fn scan_node<F>(value: &Value, field_type: &FieldType, path: &str, type_of: &F) -> Option<ThreatMatch>
where
    F: Fn(&str) -> FieldType,
{
    match value {
        Value::String(s) => classify(s, field_type).map(|kind| ThreatMatch {
            kind,
            field: path.to_string(),
        }),
        Value::Array(items) => items.iter().enumerate().find_map(|(i, item)| {
            scan_node(item, field_type, &format!("{}[{}]", path, i), type_of)
        }),
        Value::Object(map) => map.iter().find_map(|(raw_key, item)| {
            let key = sanitize_key(raw_key);
            let child = if path.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", path, key)
            };
            scan_node(item, &type_of(&key), &child, type_of)
        }),
        _ => None,
    }
}
