//! The command pipeline and its outer error boundary.
//!
//! `dispatch` is the single point where every outcome of a command, be it
//! a refusal, a handler error or a handler panic, is resolved into exactly
//! one response envelope.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::config::{EnvelopeConfig, GatewayConfig};
use crate::handlers::{
    settings_rules, CommandContext, CommandHandler, GetSettingsHandler, HandlerError,
    HandlerOutcome, PingHandler, SaveSettingsHandler,
};
use crate::http::response::{ResponseChannel, ResponseCode, ResponseEnvelope};
use crate::observability::{metrics, ErrorLogger, LogNotifier, LogScope, Notifier, WebhookNotifier};
use crate::security::{
    CommandRequest, GateError, GateOptions, Identity, RateLimiter, SecurityGate, TokenService,
};
use crate::store::{Clock, FileOptionStore, KeyValueStore, MemoryStore, OptionStore, StoreError, SystemClock};
use crate::validation::{InputValidator, ValidationError};

/// The external state the gateway reads and writes. Shared across config
/// reloads so rate-limit windows and histories survive them.
#[derive(Clone)]
pub struct GatewayServices {
    pub store: Arc<dyn KeyValueStore>,
    pub options: Arc<dyn OptionStore>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

impl GatewayServices {
    /// Everything in memory, driven by `clock`.
    pub fn in_memory(clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>) -> Self {
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        Self {
            store: store.clone(),
            options: store,
            notifier,
            clock,
        }
    }

    /// Production wiring: options persisted to disk, windows in memory,
    /// alerts to the configured webhook or the log.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, StoreError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let options: Arc<dyn OptionStore> = if config.storage.options_path.is_empty() {
            Arc::new(MemoryStore::with_clock(clock.clone()))
        } else {
            Arc::new(FileOptionStore::open(&config.storage.options_path)?)
        };
        let notifier: Arc<dyn Notifier> = if config.logging.alert_webhook.is_empty() {
            Arc::new(LogNotifier)
        } else {
            Arc::new(WebhookNotifier::new(config.logging.alert_webhook.clone()))
        };
        Ok(Self {
            store: Arc::new(MemoryStore::with_clock(clock.clone())),
            options,
            notifier,
            clock,
        })
    }
}

struct Route {
    handler: Arc<dyn CommandHandler>,
    options: GateOptions,
}

/// Security gate, command table and error boundary for one configuration.
pub struct Gateway {
    gate: SecurityGate,
    logger: Arc<ErrorLogger>,
    routes: HashMap<String, Route>,
    defaults: GateOptions,
    envelope: EnvelopeConfig,
    slow_command_ms: u64,
}

impl Gateway {
    /// A gateway with no commands registered.
    pub fn new(config: &GatewayConfig, services: &GatewayServices) -> Self {
        let logger = Arc::new(ErrorLogger::from_config(
            &config.logging,
            services.options.clone(),
            services.notifier.clone(),
        ));
        let tokens = TokenService::new(
            &config.security.token_secret,
            config.security.token_lifetime_secs,
            services.clock.clone(),
        );
        let limiter = RateLimiter::new(services.store.clone(), services.clock.clone());
        let validator = InputValidator::default()
            .strip_host_escaping(config.validation.strip_host_escaping);
        let gate = SecurityGate::new(config, tokens, limiter, validator, logger.clone());

        let defaults = GateOptions::default()
            .capability(config.security.default_capability.clone())
            .rate_limit(
                config.rate_limit.limit,
                Duration::from_secs(config.rate_limit.window_secs),
            );

        Self {
            gate,
            logger,
            routes: HashMap::new(),
            defaults,
            envelope: config.envelope.clone(),
            slow_command_ms: config.performance.slow_command_ms,
        }
    }

    /// A gateway with the built-in commands registered.
    pub fn from_config(config: &GatewayConfig, services: &GatewayServices) -> Self {
        let mut gateway = Self::new(config, services);
        let options = services.options.clone();

        let ping = gateway.default_options();
        gateway.register("ping", PingHandler, ping);

        let save = gateway.default_options().rules(settings_rules());
        gateway.register("save_settings", SaveSettingsHandler::new(options.clone()), save);

        let get = gateway.default_options();
        gateway.register("get_settings", GetSettingsHandler::new(options), get);

        gateway
    }

    pub fn register(
        &mut self,
        action: impl Into<String>,
        handler: impl CommandHandler + 'static,
        options: GateOptions,
    ) {
        let action = action.into();
        tracing::debug!(action = %action, capability = %options.capability, "Command registered");
        self.routes.insert(
            action,
            Route {
                handler: Arc::new(handler),
                options,
            },
        );
    }

    /// Gate options derived from config, for building per-command options.
    pub fn default_options(&self) -> GateOptions {
        self.defaults.clone()
    }

    pub fn actions(&self) -> Vec<&str> {
        let mut actions: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        actions.sort_unstable();
        actions
    }

    pub fn logger(&self) -> &Arc<ErrorLogger> {
        &self.logger
    }

    /// Add or replace the sanitizer for a custom field type tag.
    pub fn register_sanitizer<F>(&mut self, tag: impl Into<String>, sanitizer: F)
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.gate.validator_mut().registry_mut().register(tag, sanitizer);
    }

    /// Token for the shared action, bound to `identity`.
    pub fn issue_token(&self, identity: &Identity) -> String {
        self.gate.tokens().issue(identity)
    }

    /// A fresh envelope writing into `channel`.
    pub fn envelope(
        &self,
        channel: Box<dyn ResponseChannel>,
        request_start: Option<Instant>,
    ) -> ResponseEnvelope {
        ResponseEnvelope::new(channel, self.envelope.clone(), request_start)
    }

    /// Run one command to completion. Exactly one response is written to
    /// `envelope`, whatever happens.
    pub fn dispatch(
        &self,
        request: &CommandRequest,
        identity: &Identity,
        envelope: &mut ResponseEnvelope,
    ) {
        let started = Instant::now();
        let scope = LogScope::for_request(identity, &request.action, envelope.request_id());

        self.run(request, identity, envelope, &scope);

        if !envelope.is_sent() {
            // Every branch of `run` transmits; this is the last line of defence.
            self.logger.log_system_error(
                "command finished without a response",
                json!({ "action": request.action }),
                &scope,
            );
            envelope.system_error("command finished without a response");
        }

        let code = envelope.sent_code().unwrap_or(ResponseCode::Error);
        metrics::record_command(&request.action, code.as_str(), started);
        tracing::info!(
            request_id = %envelope.request_id(),
            action = %request.action,
            user_id = identity.user_id,
            code = %code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Command completed"
        );
    }

    fn run(
        &self,
        request: &CommandRequest,
        identity: &Identity,
        envelope: &mut ResponseEnvelope,
        scope: &LogScope,
    ) {
        let route = self.routes.get(&request.action);
        let options = route.map_or(&self.defaults, |r| &r.options);

        let admission = match self.gate.validate(request, identity, options, scope) {
            Ok(admission) => admission,
            Err(GateError::Violation(violation)) => {
                envelope.set_debug_detail(violation.detail.clone());
                match violation.rate_limit {
                    Some(info) => envelope.rate_limit_error(info.limit, info.window_secs),
                    None => envelope.security_error(violation.kind),
                };
                return;
            }
            Err(GateError::Validation(error)) => {
                self.reject_invalid(&error, envelope, scope);
                return;
            }
        };

        let Some(route) = route else {
            envelope.error(
                "Unknown command.",
                ResponseCode::Error,
                json!({ "action": request.action }),
                None,
            );
            return;
        };

        let ctx = CommandContext {
            action: &request.action,
            payload: &admission.payload,
            identity,
            request_id: envelope.request_id(),
        };
        let handler_start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| route.handler.handle(&ctx)));
        let elapsed_ms = handler_start.elapsed().as_millis() as u64;

        let measured_slow = elapsed_ms > self.slow_command_ms;
        if measured_slow {
            self.logger
                .log_performance_issue(&request.action, elapsed_ms, self.slow_command_ms, scope);
        }

        match result {
            Ok(Ok(HandlerOutcome::Success { data, message })) => {
                envelope.success(
                    data,
                    &message,
                    Some(json!({
                        "action": request.action,
                        "token_refresh": admission.refresh_token,
                    })),
                );
            }
            Ok(Ok(HandlerOutcome::Raw { body, status })) => {
                envelope.raw(body, status);
            }
            Ok(Err(HandlerError::Validation(error))) => {
                self.reject_invalid(&error, envelope, scope);
            }
            Ok(Err(HandlerError::Database { operation, message })) => {
                self.logger.log_database_error(&operation, &message, scope);
                envelope.set_debug_detail(message);
                envelope.database_error(&operation);
            }
            Ok(Err(HandlerError::TooSlow {
                execution_ms,
                threshold_ms,
            })) => {
                if !measured_slow {
                    self.logger
                        .log_performance_issue(&request.action, execution_ms, threshold_ms, scope);
                }
                envelope.performance_error(execution_ms, threshold_ms);
            }
            Ok(Err(HandlerError::Failed(message))) => {
                self.logger
                    .log_ajax_error(&message, json!({ "action": request.action }), scope);
                envelope.error(&message, ResponseCode::Error, Value::Null, None);
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                self.logger.log_system_error(
                    &format!("command handler panicked: {}", message),
                    json!({ "action": request.action }),
                    scope,
                );
                envelope.system_error(&message);
            }
        }
    }

    fn reject_invalid(&self, error: &ValidationError, envelope: &mut ResponseEnvelope, scope: &LogScope) {
        self.logger
            .log_validation_error(&error.field, &error.reason, scope);
        envelope.validation_error(BTreeMap::from([(error.field.clone(), error.reason.clone())]));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
