//! Recursive, rule-driven payload sanitation.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::validation::rules::{FieldRule, FieldType, RuleSet};
use crate::validation::sanitizers::{leaf_string, sanitize_key, unslash, SanitizerRegistry};

/// A field failed validation. `field` is a dotted path (`colors.primary`,
/// `tags[2]`).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Sanitizes payloads against per-field rules.
///
/// Structural checks (required, allowed values, length and range) run on the
/// raw value; type sanitation runs afterwards. Input is never mutated.
#[derive(Clone)]
pub struct InputValidator {
    registry: SanitizerRegistry,
    global_rules: RuleSet,
    strip_host_escaping: bool,
}

impl InputValidator {
    pub fn new(registry: SanitizerRegistry, global_rules: RuleSet) -> Self {
        Self {
            registry,
            global_rules,
            strip_host_escaping: false,
        }
    }

    /// Undo host-added backslash escaping before anything else runs.
    pub fn strip_host_escaping(mut self, enabled: bool) -> Self {
        self.strip_host_escaping = enabled;
        self
    }

    pub fn registry_mut(&mut self) -> &mut SanitizerRegistry {
        &mut self.registry
    }

    /// Rule for `field`: explicit, then global default, then plain text.
    pub fn resolve(&self, rules: &RuleSet, field: &str) -> FieldRule {
        rules
            .get(field)
            .or_else(|| self.global_rules.get(field))
            .cloned()
            .unwrap_or_default()
    }

    /// Sanitize `raw`, returning a structurally matching copy.
    pub fn sanitize(&self, raw: &Value, rules: &RuleSet) -> Result<Value, ValidationError> {
        if self.strip_host_escaping {
            self.sanitize_node(&unslash_value(raw), rules, "")
        } else {
            self.sanitize_node(raw, rules, "")
        }
    }

    fn sanitize_node(&self, value: &Value, rules: &RuleSet, path: &str) -> Result<Value, ValidationError> {
        match value {
            Value::Object(map) => self.sanitize_map(map, rules, path),
            Value::Array(items) => self.sanitize_list(items, None, rules, path),
            Value::Number(_) | Value::Bool(_) => Ok(value.clone()),
            scalar => self.apply_leaf(&FieldType::Text, scalar, path),
        }
    }

    fn sanitize_map(
        &self,
        map: &Map<String, Value>,
        rules: &RuleSet,
        path: &str,
    ) -> Result<Value, ValidationError> {
        let mut out = Map::with_capacity(map.len());
        for (raw_key, value) in map {
            let key = sanitize_key(raw_key);
            if key.is_empty() {
                tracing::debug!(key = %raw_key, "Dropping field with no safe key characters");
                continue;
            }
            let field_path = if path.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", path, key)
            };
            let rule = self.resolve(rules, &key);
            let clean = self.sanitize_field(&field_path, value, &rule, rules)?;
            out.insert(key, clean);
        }
        Ok(Value::Object(out))
    }

    fn sanitize_list(
        &self,
        items: &[Value],
        item_type: Option<&FieldType>,
        rules: &RuleSet,
        path: &str,
    ) -> Result<Value, ValidationError> {
        let text = FieldType::Text;
        let item_type = item_type.unwrap_or(&text);
        items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let item_path = format!("{}[{}]", path, index);
                match item {
                    Value::Object(map) => self.sanitize_map(map, rules, &item_path),
                    Value::Array(nested) => {
                        self.sanitize_list(nested, Some(item_type), rules, &item_path)
                    }
                    scalar if *item_type == FieldType::Text && (scalar.is_number() || scalar.is_boolean()) => {
                        Ok(scalar.clone())
                    }
                    scalar => self.apply_leaf(item_type, scalar, &item_path),
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }

    fn sanitize_field(
        &self,
        path: &str,
        value: &Value,
        rule: &FieldRule,
        rules: &RuleSet,
    ) -> Result<Value, ValidationError> {
        check_structure(path, value, rule)?;
        let clean = self.sanitize_typed(path, value, rule, rules)?;

        // Sanitation can empty or lengthen a value; the output must still obey the rule.
        if rule.required && is_empty_value(&clean) {
            return Err(ValidationError::new(path, "is required"));
        }
        if let (Some(max_length), Value::String(s)) = (rule.max_length, &clean) {
            if s.chars().count() > max_length {
                return Err(ValidationError::new(
                    path,
                    format!("must be at most {} characters", max_length),
                ));
            }
        }
        Ok(clean)
    }

    fn sanitize_typed(
        &self,
        path: &str,
        value: &Value,
        rule: &FieldRule,
        rules: &RuleSet,
    ) -> Result<Value, ValidationError> {
        match &rule.field_type {
            FieldType::Json => {
                let decoded = match value {
                    Value::String(s) if s.trim().is_empty() => Value::Null,
                    Value::String(s) => serde_json::from_str(s)
                        .map_err(|e| ValidationError::new(path, format!("invalid JSON: {}", e)))?,
                    other => other.clone(),
                };
                if decoded.is_null() {
                    return Ok(Value::Null);
                }
                match self.sanitize_node(&decoded, rules, path)? {
                    // A string field is always read as encoded JSON, so a
                    // decoded string document goes back out encoded.
                    Value::String(text) => Ok(Value::String(Value::String(text).to_string())),
                    clean => Ok(clean),
                }
            }
            FieldType::Array => match value {
                Value::Array(items) => self.sanitize_list(items, rule.items.as_ref(), rules, path),
                Value::Object(map) => self.sanitize_map(map, rules, path),
                Value::Null => Ok(Value::Array(Vec::new())),
                Value::String(s) if s.is_empty() => Ok(Value::Array(Vec::new())),
                _ => Err(ValidationError::new(path, "expected an array")),
            },
            FieldType::Text => match value {
                Value::Object(map) => self.sanitize_map(map, rules, path),
                Value::Array(items) => self.sanitize_list(items, None, rules, path),
                // Numbers and booleans carry no markup; keep their JSON type.
                Value::Number(_) | Value::Bool(_) => Ok(value.clone()),
                scalar => self.apply_leaf(&FieldType::Text, scalar, path),
            },
            leaf => self.apply_leaf(leaf, value, path),
        }
    }

    fn apply_leaf(&self, field_type: &FieldType, value: &Value, path: &str) -> Result<Value, ValidationError> {
        let tag = field_type.tag();
        let sanitizer = match self.registry.get(tag) {
            Some(s) => s,
            None => {
                tracing::warn!(field = %path, tag = %tag, "No sanitizer registered; treating as text");
                self.registry
                    .get(FieldType::Text.tag())
                    .ok_or_else(|| ValidationError::new(path, "no text sanitizer registered"))?
            }
        };
        sanitizer(value).map_err(|reason| ValidationError::new(path, reason))
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new(SanitizerRegistry::with_builtins(), RuleSet::global_defaults())
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (leaf_string(a), leaf_string(b)) {
        (Ok(x), Ok(y)) => !x.is_empty() && x == y,
        _ => false,
    }
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        _ => None,
    }
}

fn check_structure(path: &str, value: &Value, rule: &FieldRule) -> Result<(), ValidationError> {
    if is_empty_value(value) {
        if rule.required {
            return Err(ValidationError::new(path, "is required"));
        }
        return Ok(());
    }

    if let Some(allowed) = &rule.allowed_values {
        let permitted = |v: &Value| allowed.iter().any(|a| loosely_equal(a, v));
        let ok = match value {
            Value::Array(items) => items.iter().all(permitted),
            other => permitted(other),
        };
        if !ok {
            return Err(ValidationError::new(path, "is not an allowed value"));
        }
    }

    if let Some(max_length) = rule.max_length {
        let length = match value {
            Value::String(s) => s.chars().count(),
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            other => leaf_string(other).map(|s| s.chars().count()).unwrap_or(0),
        };
        if length > max_length {
            return Err(ValidationError::new(
                path,
                format!("must be at most {} characters", max_length),
            ));
        }
    }

    if rule.min.is_some() || rule.max.is_some() {
        let number = numeric_value(value)
            .ok_or_else(|| ValidationError::new(path, "must be numeric"))?;
        if let Some(min) = rule.min {
            if number < min {
                return Err(ValidationError::new(path, format!("must be at least {}", min)));
            }
        }
        if let Some(max) = rule.max {
            if number > max {
                return Err(ValidationError::new(path, format!("must be at most {}", max)));
            }
        }
    }

    Ok(())
}

fn unslash_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(unslash(s)),
        Value::Array(items) => Value::Array(items.iter().map(unslash_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (unslash(k), unslash_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> InputValidator {
        InputValidator::default()
    }

    #[test]
    fn test_keys_and_defaults() {
        let out = validator()
            .sanitize(
                &json!({"Site Title!": "<b>My</b> site", "primary_color": "ABC", "enabled": "yes"}),
                &RuleSet::new(),
            )
            .unwrap();
        assert_eq!(
            out,
            json!({"sitetitle": "My site", "primary_color": "#abc", "enabled": true})
        );
    }

    #[test]
    fn test_required_field() {
        let rules = RuleSet::new().with("title", FieldRule::new(FieldType::Text).required());
        let err = validator().sanitize(&json!({"title": "  "}), &rules).unwrap_err();
        assert_eq!(err, ValidationError::new("title", "is required"));
    }

    #[test]
    fn test_allowed_values_checked_on_raw() {
        let rules = RuleSet::new().with(
            "layout",
            FieldRule::new(FieldType::Key).allowed(["boxed", "wide"]),
        );
        assert!(validator().sanitize(&json!({"layout": "wide"}), &rules).is_ok());
        // "Wide" would sanitize to "wide", but membership is checked first.
        let err = validator().sanitize(&json!({"layout": "Wide"}), &rules).unwrap_err();
        assert_eq!(err.field, "layout");
    }

    #[test]
    fn test_range_and_length() {
        let rules = RuleSet::new()
            .with("columns", FieldRule::new(FieldType::Integer).min(1.0).max(6.0))
            .with("name", FieldRule::new(FieldType::Text).max_length(5));

        assert_eq!(
            validator().sanitize(&json!({"columns": "4"}), &rules).unwrap(),
            json!({"columns": 4})
        );
        assert!(validator().sanitize(&json!({"columns": 7}), &rules).is_err());
        assert!(validator().sanitize(&json!({"columns": "many"}), &rules).is_err());
        assert!(validator().sanitize(&json!({"name": "abcdef"}), &rules).is_err());
    }

    #[test]
    fn test_nested_rules_resolve_by_key() {
        let rules = RuleSet::new().with("link", FieldRule::new(FieldType::Url));
        let err = validator()
            .sanitize(&json!({"footer": {"links": [{"link": "ftp://x"}]}}), &rules)
            .unwrap_err();
        assert_eq!(err.field, "footer.links[0].link");
    }

    #[test]
    fn test_json_field_string_is_decoded_and_sanitized() {
        let rules = RuleSet::new().with("layout", FieldRule::new(FieldType::Json));
        let out = validator()
            .sanitize(
                &json!({"layout": "{\"Header\": \"<i>x</i>\", \"primary_color\": \"FFF\"}"}),
                &rules,
            )
            .unwrap();
        assert_eq!(out, json!({"layout": {"header": "x", "primary_color": "#fff"}}));

        let err = validator()
            .sanitize(&json!({"layout": "{broken"}), &rules)
            .unwrap_err();
        assert_eq!(err.field, "layout");
        assert!(err.reason.starts_with("invalid JSON"));
    }

    #[test]
    fn test_json_scalars_keep_type_and_settle() {
        let rules = RuleSet::new().with("cfg", FieldRule::new(FieldType::Json));
        let cases = [
            (json!("false"), json!(false)),
            (json!("true"), json!(true)),
            (json!("12.5"), json!(12.5)),
            (json!(""), Value::Null),
            (json!("null"), Value::Null),
            (json!("\"<b>hi</b>\""), json!("\"hi\"")),
            (json!("\"\""), json!("\"\"")),
        ];
        for (raw, expected) in cases {
            let once = validator().sanitize(&json!({ "cfg": raw }), &rules).unwrap();
            assert_eq!(once, json!({ "cfg": expected }), "input {}", raw);
            let twice = validator().sanitize(&once, &rules).unwrap();
            assert_eq!(twice, once, "input {}", raw);
        }
    }

    #[test]
    fn test_array_items_type() {
        let rules = RuleSet::new().with(
            "ids",
            FieldRule::new(FieldType::Array).items(FieldType::Integer),
        );
        let out = validator()
            .sanitize(&json!({"ids": ["1", 2.9, true]}), &rules)
            .unwrap();
        assert_eq!(out, json!({"ids": [1, 2, 1]}));
        assert!(validator().sanitize(&json!({"ids": 5}), &rules).is_err());
    }

    #[test]
    fn test_explicit_scalar_rejects_structure() {
        let rules = RuleSet::new().with("email", FieldRule::new(FieldType::Email));
        assert!(validator()
            .sanitize(&json!({"email": ["a@b.co"]}), &rules)
            .is_err());
    }

    #[test]
    fn test_input_not_mutated() {
        let raw = json!({"Title": "<b>x</b>"});
        let before = raw.clone();
        let _ = validator().sanitize(&raw, &RuleSet::new()).unwrap();
        assert_eq!(raw, before);
    }

    #[test]
    fn test_host_escaping_stripped_when_enabled() {
        let raw = json!({"title": r#"O\'Reilly"#});
        let stripped = validator()
            .strip_host_escaping(true)
            .sanitize(&raw, &RuleSet::new())
            .unwrap();
        assert_eq!(stripped, json!({"title": "O'Reilly"}));
    }

    #[test]
    fn test_unknown_custom_type_falls_back_to_text() {
        let rules = RuleSet::new().with(
            "phone",
            FieldRule::new(FieldType::Custom("phone".into())),
        );
        let out = validator()
            .sanitize(&json!({"phone": " <b>555</b> "}), &rules)
            .unwrap();
        assert_eq!(out, json!({"phone": "555"}));
    }

    #[test]
    fn test_registered_custom_type() {
        let mut v = validator();
        v.registry_mut().register("digits", |value: &Value| {
            Ok(Value::String(
                leaf_string(value)?.chars().filter(char::is_ascii_digit).collect(),
            ))
        });
        let rules = RuleSet::new().with(
            "phone",
            FieldRule::new(FieldType::Custom("digits".into())),
        );
        assert_eq!(
            v.sanitize(&json!({"phone": "(555) 010-1234"}), &rules).unwrap(),
            json!({"phone": "5550101234"})
        );
    }
}
