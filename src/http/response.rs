//! The single-transmission response envelope.
//!
//! # Responsibilities
//! - Build the one success or error response a command produces
//! - Attach timing, memory and correlation metadata
//! - Map envelope codes to HTTP status codes
//! - Refuse every transmission after the first
//!
//! # Design Decisions
//! - The envelope writes into a `ResponseChannel`; the HTTP layer supplies a
//!   slot it reads back once dispatch returns
//! - Every specialized error funnels into one private `send`
//! - `debug` is only ever present when the config enables it

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::config::EnvelopeConfig;
use crate::observability::memory_usage;
use crate::security::ViolationType;

/// Canonical envelope codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCode {
    Success,
    Error,
    ValidationError,
    SecurityError,
    RateLimitExceeded,
    PerformanceError,
    DatabaseError,
}

impl ResponseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseCode::Success => "success",
            ResponseCode::Error => "error",
            ResponseCode::ValidationError => "validation_error",
            ResponseCode::SecurityError => "security_error",
            ResponseCode::RateLimitExceeded => "rate_limit_exceeded",
            ResponseCode::PerformanceError => "performance_error",
            ResponseCode::DatabaseError => "database_error",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ResponseCode::Success => 200,
            ResponseCode::Error | ResponseCode::ValidationError => 400,
            ResponseCode::SecurityError => 403,
            ResponseCode::RateLimitExceeded => 429,
            ResponseCode::DatabaseError => 500,
            ResponseCode::PerformanceError => 503,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What actually goes out on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Transmission {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

/// Where an envelope writes its one response.
pub trait ResponseChannel: Send {
    fn transmit(&mut self, transmission: Transmission);
}

/// A channel that stores the transmission for the caller to pick up.
#[derive(Debug, Clone, Default)]
pub struct ResponseSlot {
    inner: Arc<Mutex<Vec<Transmission>>>,
}

impl ResponseSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the first transmission, if any.
    pub fn take(&self) -> Option<Transmission> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_empty() {
            None
        } else {
            Some(guard.remove(0))
        }
    }

    /// Number of transmissions received. Never more than one from an envelope.
    pub fn count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl ResponseChannel for ResponseSlot {
    fn transmit(&mut self, transmission: Transmission) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(transmission);
    }
}

/// Builds and transmits exactly one response per request.
pub struct ResponseEnvelope {
    channel: Box<dyn ResponseChannel>,
    config: EnvelopeConfig,
    started: Instant,
    request_id: String,
    sent: bool,
    sent_code: Option<ResponseCode>,
    detail: Option<String>,
}

impl ResponseEnvelope {
    /// `request_start` is the earliest mark the host captured for this
    /// request; without one, timing starts now.
    pub fn new(
        channel: Box<dyn ResponseChannel>,
        config: EnvelopeConfig,
        request_start: Option<Instant>,
    ) -> Self {
        let request_id = generate_request_id(&config.request_id_prefix);
        Self {
            channel,
            config,
            started: request_start.unwrap_or_else(Instant::now),
            request_id,
            sent: false,
            sent_code: None,
            detail: None,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Code of the response that went out, once one has.
    pub fn sent_code(&self) -> Option<ResponseCode> {
        self.sent_code
    }

    /// Internal detail to expose in the `debug` block. Ignored unless debug
    /// output is enabled.
    pub fn set_debug_detail(&mut self, detail: impl Into<String>) {
        self.detail = Some(detail.into());
    }

    pub fn success(&mut self, data: Value, message: &str, metadata: Option<Value>) -> bool {
        self.success_with_code(data, message, ResponseCode::Success, metadata)
    }

    pub fn success_with_code(
        &mut self,
        data: Value,
        message: &str,
        code: ResponseCode,
        metadata: Option<Value>,
    ) -> bool {
        self.send(true, message, code, 200, data, metadata, Vec::new())
    }

    pub fn error(
        &mut self,
        message: &str,
        code: ResponseCode,
        data: Value,
        metadata: Option<Value>,
    ) -> bool {
        self.send(false, message, code, code.http_status(), data, metadata, Vec::new())
    }

    pub fn validation_error(&mut self, field_errors: BTreeMap<String, String>) -> bool {
        self.error(
            "The submitted data is invalid.",
            ResponseCode::ValidationError,
            json!({ "errors": field_errors }),
            None,
        )
    }

    pub fn security_error(&mut self, violation: ViolationType) -> bool {
        self.error(
            violation.public_message(),
            ResponseCode::SecurityError,
            json!({ "violation_type": violation.as_str() }),
            None,
        )
    }

    pub fn rate_limit_error(&mut self, limit: u32, window_secs: u64) -> bool {
        let data = json!({
            "rate_limit": limit,
            "window_seconds": window_secs,
            "retry_after": window_secs,
        });
        self.send(
            false,
            &format!("Too many requests. Try again in {} seconds.", window_secs),
            ResponseCode::RateLimitExceeded,
            ResponseCode::RateLimitExceeded.http_status(),
            data,
            None,
            vec![("Retry-After".to_string(), window_secs.to_string())],
        )
    }

    pub fn performance_error(&mut self, execution_ms: u64, threshold_ms: u64) -> bool {
        self.error(
            "The operation took too long to complete.",
            ResponseCode::PerformanceError,
            json!({ "execution_time_ms": execution_ms, "threshold_ms": threshold_ms }),
            None,
        )
    }

    pub fn database_error(&mut self, operation: &str) -> bool {
        self.error(
            "A storage error occurred. Please try again.",
            ResponseCode::DatabaseError,
            json!({ "operation": operation }),
            None,
        )
    }

    /// Generic failure for unexpected errors. `detail` only reaches the
    /// client through the debug block.
    pub fn system_error(&mut self, detail: &str) -> bool {
        self.detail = Some(detail.to_string());
        self.send(
            false,
            "An unexpected error occurred.",
            ResponseCode::Error,
            500,
            Value::Null,
            None,
            Vec::new(),
        )
    }

    /// Transmit `body` as-is, without the envelope shape.
    pub fn raw(&mut self, body: Value, status: u16) -> bool {
        if !self.claim(ResponseCode::Success) {
            return false;
        }
        let transmission = Transmission {
            status,
            headers: self.base_headers(),
            body,
        };
        self.channel.transmit(transmission);
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn send(
        &mut self,
        success: bool,
        message: &str,
        code: ResponseCode,
        status: u16,
        data: Value,
        metadata: Option<Value>,
        extra_headers: Vec<(String, String)>,
    ) -> bool {
        if !self.claim(code) {
            return false;
        }

        let mut body = json!({
            "success": success,
            "message": message,
            "code": code.as_str(),
            "data": data,
            "meta": self.meta(metadata),
        });
        if self.config.debug {
            body["debug"] = json!({
                "http_status": status,
                "pid": std::process::id(),
                "detail": self.detail,
            });
        }

        let mut headers = self.base_headers();
        headers.extend(extra_headers);
        self.channel.transmit(Transmission {
            status,
            headers,
            body,
        });
        true
    }

    /// Flip the sent flag. False when the envelope was already used.
    fn claim(&mut self, code: ResponseCode) -> bool {
        if self.sent {
            tracing::warn!(
                request_id = %self.request_id,
                attempted = %code,
                sent = ?self.sent_code,
                "Response already sent; ignoring second transmission"
            );
            return false;
        }
        self.sent = true;
        self.sent_code = Some(code);
        true
    }

    fn meta(&self, metadata: Option<Value>) -> Value {
        let memory = memory_usage();
        let mut meta = Map::new();
        if let Some(Value::Object(extra)) = metadata {
            meta.extend(extra);
        }
        meta.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
        meta.insert("version".into(), json!(self.config.version));
        meta.insert(
            "execution_time_ms".into(),
            json!((self.started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0),
        );
        meta.insert("memory_usage".into(), json!(memory.current));
        meta.insert("memory_peak".into(), json!(memory.peak));
        meta.insert("request_id".into(), json!(self.request_id));
        Value::Object(meta)
    }

    fn base_headers(&self) -> Vec<(String, String)> {
        vec![("X-Request-Id".to_string(), self.request_id.clone())]
    }
}

/// `<prefix>_<uuid>_<8 hex of a hash of the current time>`
fn generate_request_id(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let stamp = hex::encode(&blake3::hash(&nanos.to_le_bytes()).as_bytes()[..4]);
    format!("{}_{}_{}", prefix, uuid::Uuid::new_v4().simple(), stamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(debug: bool) -> (ResponseEnvelope, ResponseSlot) {
        let slot = ResponseSlot::new();
        let config = EnvelopeConfig {
            debug,
            ..EnvelopeConfig::default()
        };
        (
            ResponseEnvelope::new(Box::new(slot.clone()), config, None),
            slot,
        )
    }

    #[test]
    fn test_success_shape() {
        let (mut env, slot) = envelope(false);
        assert!(env.success(json!({"saved": true}), "Saved", Some(json!({"action": "save"}))));

        let t = slot.take().unwrap();
        assert_eq!(t.status, 200);
        assert_eq!(t.body["success"], true);
        assert_eq!(t.body["code"], "success");
        assert_eq!(t.body["data"]["saved"], true);
        let meta = &t.body["meta"];
        for key in [
            "timestamp",
            "version",
            "execution_time_ms",
            "memory_usage",
            "memory_peak",
            "request_id",
        ] {
            assert!(meta.get(key).is_some(), "missing meta.{}", key);
        }
        assert_eq!(meta["action"], "save");
        assert!(t.body.get("debug").is_none());
        assert!(t.headers.iter().any(|(k, v)| k == "X-Request-Id" && v == env.request_id()));
    }

    #[test]
    fn test_transmits_exactly_once() {
        let (mut env, slot) = envelope(false);
        assert!(env.success(Value::Null, "ok", None));
        assert!(!env.error("late", ResponseCode::Error, Value::Null, None));
        assert!(!env.success(Value::Null, "again", None));
        assert!(!env.raw(json!("x"), 200));

        assert_eq!(slot.count(), 1);
        assert_eq!(env.sent_code(), Some(ResponseCode::Success));
        assert_eq!(slot.take().unwrap().body["message"], "ok");
    }

    #[test]
    fn test_rate_limit_error() {
        let (mut env, slot) = envelope(false);
        env.rate_limit_error(10, 60);
        let t = slot.take().unwrap();
        assert_eq!(t.status, 429);
        assert_eq!(t.body["code"], "rate_limit_exceeded");
        assert_eq!(
            t.body["data"],
            json!({"rate_limit": 10, "window_seconds": 60, "retry_after": 60})
        );
        assert!(t.headers.iter().any(|(k, v)| k == "Retry-After" && v == "60"));
    }

    #[test]
    fn test_specialized_errors() {
        let (mut env, slot) = envelope(false);
        env.security_error(ViolationType::InvalidNonce);
        let t = slot.take().unwrap();
        assert_eq!(t.status, 403);
        assert_eq!(t.body["success"], false);
        assert_eq!(t.body["data"]["violation_type"], "invalid_nonce");

        let (mut env, slot) = envelope(false);
        env.validation_error(BTreeMap::from([("email".to_string(), "invalid".to_string())]));
        let t = slot.take().unwrap();
        assert_eq!(t.body["code"], "validation_error");
        assert_eq!(t.body["data"]["errors"]["email"], "invalid");

        let (mut env, slot) = envelope(false);
        env.database_error("update_option");
        assert_eq!(slot.take().unwrap().status, 500);

        let (mut env, slot) = envelope(false);
        env.performance_error(5000, 2000);
        let t = slot.take().unwrap();
        assert_eq!(t.status, 503);
        assert_eq!(t.body["data"]["threshold_ms"], 2000);
    }

    #[test]
    fn test_debug_only_when_enabled() {
        let (mut env, slot) = envelope(false);
        env.system_error("handler exploded at line 3");
        let t = slot.take().unwrap();
        assert!(t.body.get("debug").is_none());
        assert!(!t.body.to_string().contains("exploded"));

        let (mut env, slot) = envelope(true);
        env.system_error("handler exploded at line 3");
        let t = slot.take().unwrap();
        assert_eq!(t.body["debug"]["detail"], "handler exploded at line 3");
        assert_eq!(t.body["debug"]["http_status"], 500);
    }

    #[test]
    fn test_request_start_mark_used() {
        let slot = ResponseSlot::new();
        let start = Instant::now() - std::time::Duration::from_millis(250);
        let mut env = ResponseEnvelope::new(Box::new(slot.clone()), EnvelopeConfig::default(), Some(start));
        env.success(Value::Null, "ok", None);
        let elapsed = slot.take().unwrap().body["meta"]["execution_time_ms"]
            .as_f64()
            .unwrap();
        assert!(elapsed >= 250.0);
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = generate_request_id("cgw");
        let b = generate_request_id("cgw");
        assert!(a.starts_with("cgw_"));
        assert_ne!(a, b);
        assert_eq!(a.split('_').count(), 3);
        let stamp = a.rsplit('_').next().unwrap();
        assert_eq!(stamp.len(), 8);
        assert!(stamp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_raw_bypasses_shape() {
        let (mut env, slot) = envelope(false);
        env.raw(json!({"plain": 1}), 202);
        let t = slot.take().unwrap();
        assert_eq!(t.status, 202);
        assert_eq!(t.body, json!({"plain": 1}));
    }
}
