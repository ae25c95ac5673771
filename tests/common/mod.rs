//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;

use command_gateway::config::{GatewayConfig, UserConfig, DEFAULT_CAPABILITY};
use command_gateway::http::ResponseSlot;
use command_gateway::observability::MemoryNotifier;
use command_gateway::security::{CommandRequest, Identity};
use command_gateway::store::ManualClock;
use command_gateway::{Gateway, GatewayServices, HttpServer};

pub const HOST: &str = "localhost:8080";
pub const ORIGIN: &str = "http://localhost:8080";
pub const ADMIN_SESSION: &str = "admin-session-0001";
pub const EDITOR_SESSION: &str = "editor-session-0002";
pub const ADMIN_KEY: &str = "admin-key-for-integration-tests";

/// Two users: an administrator and an editor without the default capability.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.security.token_secret = "integration-test-secret".into();
    config.security.expected_host = HOST.into();
    config.logging.file_path = String::new();
    config.logging.alert_email = "security@example.com".into();
    config.storage.options_path = String::new();
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.into();
    config.users = vec![
        UserConfig {
            id: 1,
            session: ADMIN_SESSION.into(),
            capabilities: vec![DEFAULT_CAPABILITY.into()],
        },
        UserConfig {
            id: 2,
            session: EDITOR_SESSION.into(),
            capabilities: vec!["edit_posts".into()],
        },
    ];
    config
}

pub struct Harness {
    pub config: GatewayConfig,
    pub services: GatewayServices,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<MemoryNotifier>,
}

impl Harness {
    pub fn new(config: GatewayConfig) -> Self {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let notifier = Arc::new(MemoryNotifier::new());
        let services = GatewayServices::in_memory(clock.clone(), notifier.clone());
        Self {
            config,
            services,
            clock,
            notifier,
        }
    }

    pub fn gateway(&self) -> Gateway {
        Gateway::from_config(&self.config, &self.services)
    }

    pub fn router(&self) -> Router {
        HttpServer::new(self.config.clone(), self.services.clone()).router()
    }
}

pub fn admin() -> Identity {
    Identity {
        user_id: 1,
        capabilities: [DEFAULT_CAPABILITY.to_string()].into_iter().collect(),
        ip: "198.51.100.4".into(),
        user_agent: "integration".into(),
        session: ADMIN_SESSION.into(),
    }
}

pub fn editor() -> Identity {
    Identity {
        user_id: 2,
        capabilities: ["edit_posts".to_string()].into_iter().collect(),
        session: EDITOR_SESSION.into(),
        ..admin()
    }
}

/// A request with a valid token for `identity` and a matching origin.
pub fn signed(gateway: &Gateway, identity: &Identity, action: &str, payload: Value) -> CommandRequest {
    CommandRequest::new(action, payload)
        .token(gateway.issue_token(identity))
        .origin(ORIGIN)
}

/// Dispatch and return the one transmitted body.
pub fn dispatch(gateway: &Gateway, request: &CommandRequest, identity: &Identity) -> Value {
    let slot = ResponseSlot::new();
    let mut envelope = gateway.envelope(Box::new(slot.clone()), None);
    gateway.dispatch(request, identity, &mut envelope);
    assert_eq!(slot.count(), 1, "exactly one transmission per request");
    slot.take().map(|t| t.body).unwrap_or(Value::Null)
}

/// Send a request through the router and decode the JSON body.
pub async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    use tower::ServiceExt;

    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}
