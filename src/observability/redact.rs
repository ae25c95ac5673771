//! Sensitive-key redaction for logged context.

use serde_json::{Map, Value};

/// Replacement written in place of a redacted value.
pub const REDACTED: &str = "[REDACTED]";

/// Key fragments that mark a value as sensitive. Compared against keys
/// lowercased with `-` and `_` removed.
const SENSITIVE_FRAGMENTS: &[&str] = &[
    "password",
    "passwd",
    "token",
    "secret",
    "auth",
    "nonce",
    "session",
    "cookie",
    "apikey",
    "privatekey",
    "creditcard",
    "cardnumber",
    "cvv",
    "ssn",
];

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized: String = key
        .chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect();
    SENSITIVE_FRAGMENTS
        .iter()
        .any(|fragment| normalized.contains(fragment))
}

/// Copy of `value` with every sensitive key's value replaced, at any depth.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, inner) in map {
                let replaced = if is_sensitive_key(key) {
                    Value::String(REDACTED.to_string())
                } else {
                    redact(inner)
                };
                out.insert(key.clone(), replaced);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_keys_redacted() {
        let input = json!({
            "user_password": "hunter2",
            "profile": {
                "API-Key": "k-123",
                "name": "ada",
                "cards": [{"credit-card": "4111111111111111"}]
            },
            "X-Auth-Token": "t"
        });
        let out = redact(&input);
        let text = out.to_string();
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("k-123"));
        assert!(!text.contains("4111111111111111"));
        assert_eq!(out["profile"]["name"], "ada");
        assert_eq!(out["user_password"], REDACTED);
    }

    #[test]
    fn test_case_insensitive_match() {
        assert!(is_sensitive_key("SessionID"));
        assert!(is_sensitive_key("user_SSN"));
        assert!(!is_sensitive_key("color"));
    }

    #[test]
    fn test_scalars_untouched() {
        assert_eq!(redact(&json!("password")), json!("password"));
        assert_eq!(redact(&json!([1, 2])), json!([1, 2]));
    }
}
