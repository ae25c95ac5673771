//! The ordered admission checks every command passes before its handler.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;

use crate::config::{GatewayConfig, DEFAULT_CAPABILITY};
use crate::observability::{ErrorLogger, LogScope};
use crate::security::identity::Identity;
use crate::security::rate_limit::{RateDecision, RateLimiter};
use crate::security::token::{TokenAge, TokenService};
use crate::security::violation::{RateLimitInfo, SecurityViolation, ViolationType};
use crate::validation::{threats, InputValidator, RuleSet, ValidationError};

/// Per-command admission settings.
#[derive(Debug, Clone)]
pub struct GateOptions {
    pub capability: String,
    pub rate_limit: u32,
    pub window: Duration,
    pub rules: RuleSet,
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            capability: DEFAULT_CAPABILITY.to_string(),
            rate_limit: 10,
            window: Duration::from_secs(60),
            rules: RuleSet::new(),
        }
    }
}

impl GateOptions {
    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = capability.into();
        self
    }

    pub fn rate_limit(mut self, limit: u32, window: Duration) -> Self {
        self.rate_limit = limit;
        self.window = window;
        self
    }

    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }
}

/// The parts of a request the gate inspects.
#[derive(Debug, Clone, Default)]
pub struct CommandRequest {
    pub action: String,
    pub payload: Value,
    pub token: Option<String>,
    pub origin: Option<String>,
    pub referer: Option<String>,
}

impl CommandRequest {
    pub fn new(action: impl Into<String>, payload: Value) -> Self {
        Self {
            action: action.into(),
            payload,
            ..Self::default()
        }
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }
}

/// Why the gate refused a request.
#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Violation(#[from] SecurityViolation),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// A request that passed every check.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    /// Sanitized copy of the request payload.
    pub payload: Value,
    /// The token is from the previous tick and expires soon.
    pub refresh_token: bool,
}

/// Runs token, capability, input, origin and rate checks in that order.
/// The first failure ends the request.
pub struct SecurityGate {
    tokens: TokenService,
    limiter: RateLimiter,
    validator: InputValidator,
    logger: Arc<ErrorLogger>,
    expected_host: String,
    local_development: bool,
    threat_scan: bool,
    rate_limit_enabled: bool,
}

impl SecurityGate {
    pub fn new(
        config: &GatewayConfig,
        tokens: TokenService,
        limiter: RateLimiter,
        validator: InputValidator,
        logger: Arc<ErrorLogger>,
    ) -> Self {
        Self {
            tokens,
            limiter,
            validator,
            logger,
            expected_host: config.security.expected_host.to_ascii_lowercase(),
            local_development: config.security.local_development,
            threat_scan: config.security.threat_scan,
            rate_limit_enabled: config.rate_limit.enabled,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn validator(&self) -> &InputValidator {
        &self.validator
    }

    pub fn validator_mut(&mut self) -> &mut InputValidator {
        &mut self.validator
    }

    /// Admit `request` or refuse it. On success returns the sanitized
    /// payload and whether the token should be refreshed; the original
    /// payload is left untouched.
    pub fn validate(
        &self,
        request: &CommandRequest,
        identity: &Identity,
        options: &GateOptions,
        scope: &LogScope,
    ) -> Result<Admission, GateError> {
        // 1. anti-forgery token
        let token = request.token.as_deref().unwrap_or("").trim();
        if token.is_empty() {
            return Err(self.refuse(
                SecurityViolation::new(ViolationType::MissingNonce, "no token supplied"),
                request,
                scope,
            ));
        }
        let Some(token_age) = self
            .tokens
            .verify(token, TokenService::action_name(), identity)
        else {
            return Err(self.refuse(
                SecurityViolation::new(ViolationType::InvalidNonce, "token did not verify"),
                request,
                scope,
            ));
        };

        // 2. capability
        if !identity.has_capability(&options.capability) {
            return Err(self.refuse(
                SecurityViolation::new(
                    ViolationType::InsufficientCapability,
                    format!("missing capability {}", options.capability),
                ),
                request,
                scope,
            ));
        }

        // 3. input
        if self.threat_scan {
            let hit = threats::scan(&request.payload, |key| {
                self.validator.resolve(&options.rules, key).field_type
            });
            if let Some(hit) = hit {
                return Err(self.refuse(
                    SecurityViolation::new(hit.kind, format!("field {}", hit.field)),
                    request,
                    scope,
                ));
            }
        }
        let sanitized = self.validator.sanitize(&request.payload, &options.rules)?;

        // 4. origin
        if !self.local_development && !self.origin_matches(request) {
            let seen = request
                .origin
                .as_deref()
                .or(request.referer.as_deref())
                .unwrap_or("none");
            return Err(self.refuse(
                SecurityViolation::new(
                    ViolationType::InvalidReferer,
                    format!("origin {} does not match {}", seen, self.expected_host),
                ),
                request,
                scope,
            ));
        }

        // 5. rate
        if self.rate_limit_enabled {
            let key = RateLimiter::key(&request.action, identity);
            if let RateDecision::Limited { retry_after_secs } =
                self.limiter.check(&key, options.rate_limit, options.window)
            {
                tracing::debug!(action = %request.action, retry_after_secs, "Command rate limited");
                return Err(self.refuse(
                    SecurityViolation::rate_limited(RateLimitInfo {
                        limit: options.rate_limit,
                        window_secs: options.window.as_secs(),
                    }),
                    request,
                    scope,
                ));
            }
        }

        Ok(Admission {
            payload: sanitized,
            refresh_token: token_age == TokenAge::Aging,
        })
    }

    /// The Origin header wins over the Referer. Either must name the
    /// configured host, port included when non-default.
    fn origin_matches(&self, request: &CommandRequest) -> bool {
        let source = request
            .origin
            .as_deref()
            .filter(|o| !o.is_empty() && *o != "null")
            .or(request.referer.as_deref());
        match source.and_then(authority_of) {
            Some(authority) => authority == self.expected_host,
            None => false,
        }
    }

    fn refuse(
        &self,
        violation: SecurityViolation,
        request: &CommandRequest,
        scope: &LogScope,
    ) -> GateError {
        let mut details = json!({
            "action": request.action,
            "detail": violation.detail,
        });
        if let Some(info) = violation.rate_limit {
            details["rate_limit"] = json!(info.limit);
            details["window_seconds"] = json!(info.window_secs);
        }
        self.logger
            .log_security_violation(violation.kind, details, scope);
        GateError::Violation(violation)
    }
}

fn authority_of(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoggingConfig;
    use crate::observability::MemoryNotifier;
    use crate::store::{ManualClock, MemoryStore, OptionStore};
    use crate::validation::{FieldRule, FieldType};

    struct Fixture {
        gate: SecurityGate,
        logger: Arc<ErrorLogger>,
        notifier: Arc<MemoryNotifier>,
        clock: Arc<ManualClock>,
    }

    fn fixture(configure: impl FnOnce(&mut GatewayConfig)) -> Fixture {
        let mut config = GatewayConfig::default();
        config.security.token_secret = "a-test-secret-of-some-length".into();
        config.security.expected_host = "admin.example.com".into();
        configure(&mut config);

        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let notifier = Arc::new(MemoryNotifier::new());
        let logging = LoggingConfig {
            file_path: String::new(),
            alert_email: "ops@example.com".into(),
            ..LoggingConfig::default()
        };
        let options: Arc<dyn OptionStore> = store.clone();
        let logger = Arc::new(ErrorLogger::from_config(&logging, options, notifier.clone()));
        let gate = SecurityGate::new(
            &config,
            TokenService::new(&config.security.token_secret, 86_400, clock.clone()),
            RateLimiter::new(store, clock.clone()),
            InputValidator::default(),
            logger.clone(),
        );
        Fixture {
            gate,
            logger,
            notifier,
            clock,
        }
    }

    fn admin() -> Identity {
        Identity {
            user_id: 1,
            capabilities: [DEFAULT_CAPABILITY.to_string()].into_iter().collect(),
            ip: "203.0.113.7".into(),
            user_agent: "test".into(),
            session: "s-1".into(),
        }
    }

    fn request(f: &Fixture, payload: Value) -> CommandRequest {
        CommandRequest::new("save_settings", payload)
            .token(f.gate.tokens().issue(&admin()))
            .origin("https://admin.example.com")
    }

    fn violation_kind(err: GateError) -> ViolationType {
        match err {
            GateError::Violation(v) => v.kind,
            other => panic!("expected violation, got {:?}", other),
        }
    }

    #[test]
    fn test_admits_and_sanitizes() {
        let f = fixture(|_| {});
        let payload = json!({"title": "  Hello <b>world</b> ", "enabled": "yes"});
        let out = f
            .gate
            .validate(&request(&f, payload.clone()), &admin(), &GateOptions::default(), &LogScope::default())
            .unwrap();
        assert_eq!(out.payload["title"], "Hello world");
        assert_eq!(out.payload["enabled"], true);
        assert!(!out.refresh_token);
        assert_eq!(payload["title"], "  Hello <b>world</b> ");
        assert!(f.logger.violations().entries().unwrap().is_empty());
    }

    #[test]
    fn test_previous_tick_token_asks_for_refresh() {
        let f = fixture(|_| {});
        let req = request(&f, json!({}));
        f.clock.advance(Duration::from_secs(43_200));

        let admitted = f
            .gate
            .validate(&req, &admin(), &GateOptions::default(), &LogScope::default())
            .unwrap();
        assert!(admitted.refresh_token);
    }

    #[test]
    fn test_missing_and_invalid_token() {
        let f = fixture(|_| {});
        let scope = LogScope::default();
        let opts = GateOptions::default();

        let mut req = request(&f, json!({}));
        req.token = None;
        let err = f.gate.validate(&req, &admin(), &opts, &scope).unwrap_err();
        assert_eq!(violation_kind(err), ViolationType::MissingNonce);

        req.token = Some("0123456789abcdef0123".into());
        let err = f.gate.validate(&req, &admin(), &opts, &scope).unwrap_err();
        assert_eq!(violation_kind(err), ViolationType::InvalidNonce);

        let history = f.logger.violations().entries().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["type"], "missing_nonce");
        assert_eq!(history[1]["severity"], "high");
    }

    #[test]
    fn test_capability_checked_after_token() {
        let f = fixture(|_| {});
        let editor = Identity {
            capabilities: Default::default(),
            ..admin()
        };
        let err = f
            .gate
            .validate(&request(&f, json!({})), &editor, &GateOptions::default(), &LogScope::default())
            .unwrap_err();
        assert_eq!(violation_kind(err), ViolationType::InsufficientCapability);

        let custom = GateOptions::default().capability("edit_posts");
        let err = f
            .gate
            .validate(&request(&f, json!({})), &admin(), &custom, &LogScope::default())
            .unwrap_err();
        assert_eq!(violation_kind(err), ViolationType::InsufficientCapability);
    }

    #[test]
    fn test_injection_is_critical_and_alerts() {
        let f = fixture(|_| {});
        let err = f
            .gate
            .validate(
                &request(&f, json!({"search": "' OR '1'='1"})),
                &admin(),
                &GateOptions::default(),
                &LogScope::default(),
            )
            .unwrap_err();
        assert_eq!(violation_kind(err), ViolationType::SqlInjectionAttempt);
        assert_eq!(f.notifier.sent().len(), 1);
    }

    #[test]
    fn test_validation_error_is_not_a_violation() {
        let f = fixture(|_| {});
        let opts = GateOptions::default()
            .rules(RuleSet::new().with("email", FieldRule::new(FieldType::Email).required()));
        let err = f
            .gate
            .validate(&request(&f, json!({"email": "nope"})), &admin(), &opts, &LogScope::default())
            .unwrap_err();
        match err {
            GateError::Validation(e) => assert_eq!(e.field, "email"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(f.logger.violations().entries().unwrap().is_empty());
    }

    #[test]
    fn test_origin_checks() {
        let f = fixture(|_| {});
        let opts = GateOptions::default();
        let scope = LogScope::default();

        let foreign = request(&f, json!({})).origin("https://evil.example.net");
        let err = f.gate.validate(&foreign, &admin(), &opts, &scope).unwrap_err();
        assert_eq!(violation_kind(err), ViolationType::InvalidReferer);

        let mut via_referer = request(&f, json!({}));
        via_referer.origin = None;
        let via_referer = via_referer.referer("https://ADMIN.example.com/settings?page=1");
        assert!(f.gate.validate(&via_referer, &admin(), &opts, &scope).is_ok());

        let mut neither = request(&f, json!({}));
        neither.origin = None;
        let err = f.gate.validate(&neither, &admin(), &opts, &scope).unwrap_err();
        assert_eq!(violation_kind(err), ViolationType::InvalidReferer);
    }

    #[test]
    fn test_local_development_skips_origin() {
        let f = fixture(|c| c.security.local_development = true);
        let mut req = request(&f, json!({}));
        req.origin = None;
        assert!(f
            .gate
            .validate(&req, &admin(), &GateOptions::default(), &LogScope::default())
            .is_ok());
    }

    #[test]
    fn test_rate_limit_after_limit() {
        let f = fixture(|_| {});
        let opts = GateOptions::default().rate_limit(2, Duration::from_secs(60));
        let scope = LogScope::default();
        for _ in 0..2 {
            assert!(f.gate.validate(&request(&f, json!({})), &admin(), &opts, &scope).is_ok());
        }
        match f.gate.validate(&request(&f, json!({})), &admin(), &opts, &scope) {
            Err(GateError::Violation(v)) => {
                assert_eq!(v.kind, ViolationType::RateLimitExceeded);
                assert_eq!(
                    v.rate_limit,
                    Some(RateLimitInfo {
                        limit: 2,
                        window_secs: 60
                    })
                );
            }
            other => panic!("unexpected {:?}", other),
        }

        f.clock.advance(Duration::from_secs(61));
        assert!(f.gate.validate(&request(&f, json!({})), &admin(), &opts, &scope).is_ok());
    }

    #[test]
    fn test_rate_limit_disabled() {
        let f = fixture(|c| c.rate_limit.enabled = false);
        let opts = GateOptions::default().rate_limit(1, Duration::from_secs(60));
        for _ in 0..5 {
            assert!(f
                .gate
                .validate(&request(&f, json!({})), &admin(), &opts, &LogScope::default())
                .is_ok());
        }
    }
}
