//! Command handlers: the business logic behind each action.
//!
//! Handlers only ever see a payload that already passed the security gate
//! and sanitation. They return an outcome; the gateway turns it into the
//! one response envelope.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::security::Identity;
use crate::store::OptionStore;
use crate::validation::{FieldRule, FieldType, RuleSet, ValidationError};

/// Option holding the settings managed by the built-in commands.
pub const SETTINGS_OPTION: &str = "gateway_settings";

/// What a handler gets to work with.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    pub action: &'a str,
    /// Sanitized payload.
    pub payload: &'a Value,
    pub identity: &'a Identity,
    pub request_id: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    Success { data: Value, message: String },
    /// Bypass the envelope shape.
    Raw { body: Value, status: u16 },
}

impl HandlerOutcome {
    pub fn success(data: Value, message: impl Into<String>) -> Self {
        HandlerOutcome::Success {
            data,
            message: message.into(),
        }
    }
}

/// Expected handler failures. Anything else should panic and is caught at
/// the gateway boundary.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("storage operation {operation} failed: {message}")]
    Database { operation: String, message: String },

    #[error("operation took {execution_ms}ms (threshold {threshold_ms}ms)")]
    TooSlow { execution_ms: u64, threshold_ms: u64 },

    #[error("{0}")]
    Failed(String),
}

pub trait CommandHandler: Send + Sync {
    fn handle(&self, ctx: &CommandContext<'_>) -> Result<HandlerOutcome, HandlerError>;
}

impl<F> CommandHandler for F
where
    F: Fn(&CommandContext<'_>) -> Result<HandlerOutcome, HandlerError> + Send + Sync,
{
    fn handle(&self, ctx: &CommandContext<'_>) -> Result<HandlerOutcome, HandlerError> {
        self(ctx)
    }
}

/// Liveness check for authenticated callers.
pub struct PingHandler;

impl CommandHandler for PingHandler {
    fn handle(&self, ctx: &CommandContext<'_>) -> Result<HandlerOutcome, HandlerError> {
        Ok(HandlerOutcome::success(
            json!({ "pong": true, "user_id": ctx.identity.user_id }),
            "pong",
        ))
    }
}

/// Rules for `save_settings`, on top of the global defaults.
pub fn settings_rules() -> RuleSet {
    RuleSet::new()
        .with("site_title", FieldRule::new(FieldType::Text).max_length(200))
        .with(
            "items_per_page",
            FieldRule::new(FieldType::Integer).min(1.0).max(100.0),
        )
        .with(
            "theme",
            FieldRule::new(FieldType::Key).allowed(["light", "dark", "auto"]),
        )
        .with("footer_text", FieldRule::new(FieldType::Textarea).max_length(2000))
}

/// Merges the payload into the stored settings object.
pub struct SaveSettingsHandler {
    options: Arc<dyn OptionStore>,
}

impl SaveSettingsHandler {
    pub fn new(options: Arc<dyn OptionStore>) -> Self {
        Self { options }
    }
}

impl CommandHandler for SaveSettingsHandler {
    fn handle(&self, ctx: &CommandContext<'_>) -> Result<HandlerOutcome, HandlerError> {
        let Value::Object(updates) = ctx.payload else {
            return Err(ValidationError::new("payload", "must be an object").into());
        };
        if updates.is_empty() {
            return Err(ValidationError::new("payload", "nothing to save").into());
        }

        let mut settings = load_settings(self.options.as_ref())?;
        for (key, value) in updates {
            settings.insert(key.clone(), value.clone());
        }
        let settings = Value::Object(settings);
        self.options
            .update_option(SETTINGS_OPTION, settings.clone())
            .map_err(|e| HandlerError::Database {
                operation: "update_option".into(),
                message: e.to_string(),
            })?;

        tracing::info!(
            request_id = %ctx.request_id,
            user_id = ctx.identity.user_id,
            fields = updates.len(),
            "Settings saved"
        );
        Ok(HandlerOutcome::success(
            json!({ "settings": settings }),
            "Settings saved.",
        ))
    }
}

/// Returns the stored settings object.
pub struct GetSettingsHandler {
    options: Arc<dyn OptionStore>,
}

impl GetSettingsHandler {
    pub fn new(options: Arc<dyn OptionStore>) -> Self {
        Self { options }
    }
}

impl CommandHandler for GetSettingsHandler {
    fn handle(&self, _ctx: &CommandContext<'_>) -> Result<HandlerOutcome, HandlerError> {
        let settings = load_settings(self.options.as_ref())?;
        Ok(HandlerOutcome::success(
            json!({ "settings": settings }),
            "Settings loaded.",
        ))
    }
}

fn load_settings(options: &dyn OptionStore) -> Result<Map<String, Value>, HandlerError> {
    match options.get_option(SETTINGS_OPTION) {
        Ok(Some(Value::Object(map))) => Ok(map),
        Ok(_) => Ok(Map::new()),
        Err(e) => Err(HandlerError::Database {
            operation: "get_option".into(),
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn ctx<'a>(payload: &'a Value, identity: &'a Identity) -> CommandContext<'a> {
        CommandContext {
            action: "save_settings",
            payload,
            identity,
            request_id: "cgw_test",
        }
    }

    #[test]
    fn test_save_merges_and_get_reads_back() {
        let store = Arc::new(MemoryStore::new());
        let save = SaveSettingsHandler::new(store.clone());
        let get = GetSettingsHandler::new(store.clone());
        let identity = Identity::default();

        save.handle(&ctx(&json!({"site_title": "One", "theme": "dark"}), &identity))
            .unwrap();
        save.handle(&ctx(&json!({"site_title": "Two"}), &identity))
            .unwrap();

        match get.handle(&ctx(&Value::Null, &identity)).unwrap() {
            HandlerOutcome::Success { data, .. } => {
                assert_eq!(data["settings"], json!({"site_title": "Two", "theme": "dark"}));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_save_rejects_empty_payload() {
        let save = SaveSettingsHandler::new(Arc::new(MemoryStore::new()));
        let identity = Identity::default();
        let err = save.handle(&ctx(&json!({}), &identity)).unwrap_err();
        assert!(matches!(err, HandlerError::Validation(_)));
    }

    #[test]
    fn test_closure_handlers() {
        let handler = |c: &CommandContext<'_>| -> Result<HandlerOutcome, HandlerError> {
            Ok(HandlerOutcome::success(json!(c.action), "ok"))
        };
        let identity = Identity::default();
        assert!(handler.handle(&ctx(&Value::Null, &identity)).is_ok());
        assert!(PingHandler.handle(&ctx(&Value::Null, &identity)).is_ok());
    }
}
