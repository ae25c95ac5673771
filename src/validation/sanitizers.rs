//! Type-tagged leaf sanitizers and the registry that dispatches to them.
//!
//! # Design Decisions
//! - Each sanitizer is a pure `&Value → Result<Value, reason>` function
//! - Output is a fixed point: sanitizing an output again returns it unchanged
//! - New types are added with `SanitizerRegistry::register`, not by editing a switch

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::{Number, Value};

/// A leaf sanitizer. `Err` carries a human-readable reason.
pub type Sanitizer = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

/// Maps type tags to sanitizers.
#[derive(Clone)]
pub struct SanitizerRegistry {
    table: HashMap<String, Sanitizer>,
}

impl SanitizerRegistry {
    pub fn empty() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Registry holding every built-in leaf type.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("email", sanitize_email);
        registry.register("url", sanitize_url);
        registry.register("hex_color", sanitize_hex_color);
        registry.register("number", sanitize_number);
        registry.register("integer", sanitize_integer);
        registry.register("boolean", |v: &Value| Ok(Value::Bool(boolean_of(v))));
        registry.register("text", sanitize_text);
        registry.register("textarea", sanitize_textarea);
        registry.register("rich_text", sanitize_rich_text);
        registry.register("slug", sanitize_slug);
        registry.register("key", |v: &Value| Ok(Value::String(sanitize_key(&leaf_string(v)?))));
        registry
    }

    pub fn register<F>(&mut self, tag: impl Into<String>, sanitizer: F)
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.table.insert(tag.into(), Arc::new(sanitizer));
    }

    pub fn get(&self, tag: &str) -> Option<&Sanitizer> {
        self.table.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.table.contains_key(tag)
    }
}

impl Default for SanitizerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static sanitizer pattern"))
}

/// String form of a scalar. Compound values are rejected.
pub fn leaf_string(value: &Value) -> Result<String, String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(true) => Ok("1".to_string()),
        Value::Bool(false) => Ok(String::new()),
        Value::Array(_) | Value::Object(_) => Err("expected a scalar value".to_string()),
    }
}

/// Loose truthiness used for boolean fields.
///
/// Strings are true only for `1`, `true`, `yes`, `on` (any case).
pub fn boolean_of(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(
            s.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Lowercase and keep only `[a-z0-9_-]`.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Remove `<script>`/`<style>` blocks with their content, then every tag.
pub fn strip_all_tags(input: &str) -> String {
    static SCRIPT: OnceLock<Regex> = OnceLock::new();
    static STYLE: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();

    let out = regex(&SCRIPT, r"(?is)<script\b[^>]*>.*?</script\s*>").replace_all(input, "");
    let out = regex(&STYLE, r"(?is)<style\b[^>]*>.*?</style\s*>").replace_all(&out, "");
    regex(&TAG, r"(?s)<[^>]*>").replace_all(&out, "").into_owned()
}

/// Apply `pass` until the output stops changing.
///
/// Every pass after the first only removes characters, so this terminates.
fn to_fixed_point(input: String, pass: impl Fn(&str) -> String) -> String {
    let mut current = input;
    loop {
        let next = pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Remove `%XX` octets, including ones that only form once an inner octet
/// is gone (`%4%411` → ``).
///
/// Octet matches cannot overlap, so reducing on a stack in one pass gives
/// the same result as removing matches until none remain.
fn remove_octets(input: &str) -> String {
    let mut out: Vec<char> = Vec::with_capacity(input.len());
    for c in input.chars() {
        out.push(c);
        let n = out.len();
        if n >= 3
            && out[n - 3] == '%'
            && out[n - 2].is_ascii_hexdigit()
            && out[n - 1].is_ascii_hexdigit()
        {
            out.truncate(n - 3);
        }
    }
    out.into_iter().collect()
}

fn text_pass(input: &str, keep_newlines: bool) -> String {
    static SPACES: OnceLock<Regex> = OnceLock::new();

    let normalized = input.replace("\r\n", "\n").replace('\r', "\n");
    let stripped = strip_all_tags(&normalized).replace('<', "&lt;");
    let without_controls: String = stripped
        .chars()
        .map(|c| if !keep_newlines && (c == '\n' || c == '\t') { ' ' } else { c })
        .filter(|c| !c.is_control() || (keep_newlines && (*c == '\n' || *c == '\t')))
        .collect();
    let without_octets = remove_octets(&without_controls);

    if keep_newlines {
        without_octets.trim().to_string()
    } else {
        regex(&SPACES, r"\s+")
            .replace_all(&without_octets, " ")
            .trim()
            .to_string()
    }
}

/// Single-line plain text.
pub fn sanitize_text(value: &Value) -> Result<Value, String> {
    let raw = leaf_string(value)?;
    Ok(Value::String(to_fixed_point(raw, |s| text_pass(s, false))))
}

/// Multi-line plain text.
pub fn sanitize_textarea(value: &Value) -> Result<Value, String> {
    let raw = leaf_string(value)?;
    Ok(Value::String(to_fixed_point(raw, |s| text_pass(s, true))))
}

pub fn sanitize_email(value: &Value) -> Result<Value, String> {
    static EMAIL: OnceLock<Regex> = OnceLock::new();

    let raw = leaf_string(value)?;
    let email = raw.trim();
    if email.is_empty() {
        return Ok(Value::String(String::new()));
    }
    let pattern = regex(
        &EMAIL,
        r"^[A-Za-z0-9!#$%&'*+/=?^_`{|}~.-]+@[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)+$",
    );
    if email.len() > 254 || !pattern.is_match(email) {
        return Err("invalid email address".to_string());
    }
    Ok(Value::String(email.to_string()))
}

fn allowed_scheme(scheme: &str) -> bool {
    matches!(scheme, "http" | "https" | "mailto")
}

pub fn sanitize_url(value: &Value) -> Result<Value, String> {
    let raw = leaf_string(value)?;
    let cleaned: String = raw.trim().chars().filter(|c| !c.is_control()).collect();
    if cleaned.is_empty() {
        return Ok(Value::String(String::new()));
    }
    let parsed = url::Url::parse(&cleaned).map_err(|_| "invalid URL".to_string())?;
    if !allowed_scheme(parsed.scheme()) {
        return Err(format!("URL scheme '{}' is not allowed", parsed.scheme()));
    }
    Ok(Value::String(parsed.to_string()))
}

pub fn sanitize_hex_color(value: &Value) -> Result<Value, String> {
    static HEX: OnceLock<Regex> = OnceLock::new();

    let raw = leaf_string(value)?;
    let color = raw.trim();
    if color.is_empty() {
        return Ok(Value::String(String::new()));
    }
    let pattern = regex(&HEX, r"^#?([0-9a-fA-F]{3}|[0-9a-fA-F]{6})$");
    match pattern.captures(color) {
        Some(caps) => Ok(Value::String(format!("#{}", caps[1].to_ascii_lowercase()))),
        None => Err("invalid hex color".to_string()),
    }
}

pub fn sanitize_number(value: &Value) -> Result<Value, String> {
    match value {
        Value::Number(_) => Ok(value.clone()),
        Value::Bool(b) => Ok(Value::from(u8::from(*b))),
        Value::Null => Ok(Value::from(0)),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(Value::from(0));
            }
            if let Ok(i) = s.parse::<i64>() {
                return Ok(Value::from(i));
            }
            s.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| "must be numeric".to_string())
        }
        Value::Array(_) | Value::Object(_) => Err("expected a scalar value".to_string()),
    }
}

pub fn sanitize_integer(value: &Value) -> Result<Value, String> {
    let truncate = |f: f64| -> Result<Value, String> {
        if f.is_finite() && f.abs() < i64::MAX as f64 {
            Ok(Value::from(f.trunc() as i64))
        } else {
            Err("integer out of range".to_string())
        }
    };
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Value::from(i)),
            None => truncate(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::Bool(b) => Ok(Value::from(i64::from(*b))),
        Value::Null => Ok(Value::from(0)),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(Value::from(0));
            }
            match s.parse::<i64>() {
                Ok(i) => Ok(Value::from(i)),
                Err(_) => match s.parse::<f64>() {
                    Ok(f) => truncate(f),
                    Err(_) => Err("must be an integer".to_string()),
                },
            }
        }
        Value::Array(_) | Value::Object(_) => Err("expected a scalar value".to_string()),
    }
}

/// Lowercase, dash-separated `[a-z0-9_-]`.
pub fn sanitize_slug(value: &Value) -> Result<Value, String> {
    static DASHES: OnceLock<Regex> = OnceLock::new();

    let raw = strip_all_tags(&leaf_string(value)?);
    let spaced: String = raw
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_whitespace() || c == '.' { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    let collapsed = regex(&DASHES, r"-+").replace_all(&spaced, "-");
    Ok(Value::String(collapsed.trim_matches('-').to_string()))
}

const RICH_TAGS: &[&str] = &[
    "a", "abbr", "b", "blockquote", "br", "code", "em", "h1", "h2", "h3", "h4", "h5", "h6", "hr",
    "i", "li", "ol", "p", "pre", "span", "strong", "u", "ul",
];

fn rich_attributes(tag: &str) -> &'static [&'static str] {
    match tag {
        "a" => &["href", "title", "rel", "target"],
        "abbr" => &["title"],
        "span" | "p" => &["class"],
        _ => &[],
    }
}

fn safe_href(value: &str) -> bool {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .flat_map(char::to_lowercase)
        .collect();
    match compact.find(':') {
        Some(colon) => {
            let before = &compact[..colon];
            // A colon after a path/query/fragment delimiter is not a scheme.
            before.contains(['/', '?', '#']) || allowed_scheme(before)
        }
        None => true,
    }
}

fn escape_attribute_value(value: &str) -> String {
    value
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn rich_text_pass(input: &str) -> String {
    static SCRIPT: OnceLock<Regex> = OnceLock::new();
    static STYLE: OnceLock<Regex> = OnceLock::new();
    static COMMENT: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    static ATTR: OnceLock<Regex> = OnceLock::new();

    let out = regex(&SCRIPT, r"(?is)<script\b[^>]*>.*?</script\s*>").replace_all(input, "");
    let out = regex(&STYLE, r"(?is)<style\b[^>]*>.*?</style\s*>").replace_all(&out, "");
    let out = regex(&COMMENT, r"(?s)<!--.*?-->").replace_all(&out, "");

    let attr_re = regex(
        &ATTR,
        r#"([a-zA-Z][a-zA-Z0-9_-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#,
    );
    regex(&TAG, r"(?s)<(/?)([a-zA-Z][a-zA-Z0-9]*)\b([^>]*)>")
        .replace_all(&out, |caps: &regex::Captures<'_>| {
            let tag = caps[2].to_ascii_lowercase();
            if !RICH_TAGS.contains(&tag.as_str()) {
                return String::new();
            }
            if !caps[1].is_empty() {
                return format!("</{}>", tag);
            }
            let allowed = rich_attributes(&tag);
            let mut rebuilt = format!("<{}", tag);
            for attr in attr_re.captures_iter(&caps[3]) {
                let name = attr[1].to_ascii_lowercase();
                if !allowed.contains(&name.as_str()) {
                    continue;
                }
                let value = attr
                    .get(2)
                    .or_else(|| attr.get(3))
                    .or_else(|| attr.get(4))
                    .map_or("", |m| m.as_str());
                if name == "href" && !safe_href(value) {
                    continue;
                }
                rebuilt.push_str(&format!(" {}=\"{}\"", name, escape_attribute_value(value)));
            }
            rebuilt.push('>');
            rebuilt
        })
        .into_owned()
}

/// Markup restricted to a small set of formatting tags and attributes.
pub fn sanitize_rich_text(value: &Value) -> Result<Value, String> {
    let raw = leaf_string(value)?;
    Ok(Value::String(to_fixed_point(raw, rich_text_pass).trim().to_string()))
}

/// Undo backslash escaping added by a host (`\'` → `'`, `\\` → `\`).
pub fn unslash(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('0') => out.push('\0'),
                Some(next) => out.push(next),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}
