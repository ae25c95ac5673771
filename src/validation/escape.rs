//! Context-aware output escaping.
//!
//! Escaping is for re-emitting already sanitized values into a new output
//! context. It is not input validation and never replaces it.

use crate::validation::sanitizers::strip_all_tags;

/// Output context a value is being written into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeContext {
    /// Element content.
    Html,
    /// A quoted attribute value.
    Attribute,
    /// A JavaScript string literal (quotes included in the output).
    Script,
    /// A link target. Unsafe schemes escape to an empty string.
    Url,
    /// Plain text with any markup removed, then HTML-escaped.
    Text,
}

pub fn escape(value: &str, context: EscapeContext) -> String {
    match context {
        EscapeContext::Html => escape_html(value),
        EscapeContext::Attribute => escape_html(value).replace('`', "&#96;"),
        EscapeContext::Script => escape_script(value),
        EscapeContext::Url => escape_url(value),
        EscapeContext::Text => escape_html(&strip_all_tags(value)),
    }
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            other => out.push(other),
        }
    }
    out
}

fn escape_script(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            // Keep the literal from closing a surrounding <script> block.
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\'' => out.push_str("\\u0027"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn escape_url(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    match url::Url::parse(trimmed) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https" | "mailto") => {
            escape_html(parsed.as_str())
        }
        Ok(_) => String::new(),
        // Relative references stay relative, but may not smuggle a scheme.
        Err(_) if !trimmed.contains(':') => escape_html(trimmed),
        Err(_) => String::new(),
    }
}
