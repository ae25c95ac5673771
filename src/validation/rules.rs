//! Declarative per-field validation rules.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type tag selecting a field's sanitizer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Email,
    Url,
    HexColor,
    Number,
    Integer,
    Boolean,
    Text,
    Textarea,
    RichText,
    Json,
    Array,
    Slug,
    Key,
    /// A sanitizer registered at runtime under this tag.
    Custom(String),
}

impl FieldType {
    pub fn tag(&self) -> &str {
        match self {
            FieldType::Email => "email",
            FieldType::Url => "url",
            FieldType::HexColor => "hex_color",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Text => "text",
            FieldType::Textarea => "textarea",
            FieldType::RichText => "rich_text",
            FieldType::Json => "json",
            FieldType::Array => "array",
            FieldType::Slug => "slug",
            FieldType::Key => "key",
            FieldType::Custom(tag) => tag,
        }
    }
}

/// Validation rule for one field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub allowed_values: Option<Vec<Value>>,
    /// Element type for `array` fields. Defaults to text.
    #[serde(default)]
    pub items: Option<FieldType>,
}

impl FieldRule {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            min: None,
            max: None,
            max_length: None,
            allowed_values: None,
            items: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn allowed<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn items(mut self, items: FieldType) -> Self {
        self.items = Some(items);
        self
    }
}

impl Default for FieldRule {
    fn default() -> Self {
        Self::new(FieldType::Text)
    }
}

/// Rules keyed by (sanitized) field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: HashMap<String, FieldRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, rule: FieldRule) -> Self {
        self.rules.insert(field.into(), rule);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, rule: FieldRule) {
        self.rules.insert(field.into(), rule);
    }

    pub fn get(&self, field: &str) -> Option<&FieldRule> {
        self.rules.get(field)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules for field names every command shares.
    pub fn global_defaults() -> Self {
        Self::new()
            .with("email", FieldRule::new(FieldType::Email))
            .with("admin_email", FieldRule::new(FieldType::Email))
            .with("url", FieldRule::new(FieldType::Url))
            .with("site_url", FieldRule::new(FieldType::Url))
            .with("enabled", FieldRule::new(FieldType::Boolean))
            .with("primary_color", FieldRule::new(FieldType::HexColor))
            .with("secondary_color", FieldRule::new(FieldType::HexColor))
            .with("custom_css", FieldRule::new(FieldType::Textarea))
            .with("description", FieldRule::new(FieldType::RichText))
            .with("slug", FieldRule::new(FieldType::Slug))
            .with("settings_json", FieldRule::new(FieldType::Json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_deserializes_from_json() {
        let rule: FieldRule = serde_json::from_value(serde_json::json!({
            "type": "integer",
            "required": true,
            "min": 1,
            "max": 10
        }))
        .unwrap();
        assert_eq!(rule, FieldRule::new(FieldType::Integer).required().min(1.0).max(10.0));
    }

    #[test]
    fn test_custom_tag() {
        assert_eq!(FieldType::Custom("phone".into()).tag(), "phone");
        assert_eq!(FieldType::HexColor.tag(), "hex_color");
    }
}
