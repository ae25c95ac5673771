//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router for commands, tokens and admin
//! - Wire up middleware (request start, tracing, timeout, body limit)
//! - Resolve the caller and run the synchronous gateway off the runtime
//! - Turn the envelope's transmission into an HTTP response
//! - Swap in a rebuilt gateway on config reload

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderName, HeaderValue, Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::setup_admin_router;
use crate::config::GatewayConfig;
use crate::gateway::{Gateway, GatewayServices};
use crate::http::request::{mark_request_start, CallerInfo, CommandBody, RequestStart};
use crate::http::response::{ResponseEnvelope, ResponseSlot, Transmission};
use crate::observability::LogScope;
use crate::security::{
    CommandRequest, ConfiguredUsers, IdentityProvider, TokenService, ViolationType,
};

/// Everything built from one configuration.
pub struct InnerState {
    pub config: GatewayConfig,
    pub gateway: Gateway,
    pub identities: ConfiguredUsers,
}

impl InnerState {
    pub fn build(config: GatewayConfig, services: &GatewayServices) -> Self {
        Self {
            gateway: Gateway::from_config(&config, services),
            identities: ConfiguredUsers::new(&config.users),
            config,
        }
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<ArcSwap<InnerState>>,
    pub services: GatewayServices,
}

impl AppState {
    pub fn new(config: GatewayConfig, services: GatewayServices) -> Self {
        let inner = InnerState::build(config, &services);
        Self {
            inner: Arc::new(ArcSwap::from_pointee(inner)),
            services,
        }
    }

    /// Rebuild the gateway for `config` and swap it in. Requests already
    /// running finish on the state they started with.
    pub fn reload(&self, config: GatewayConfig) {
        let inner = InnerState::build(config, &self.services);
        self.inner.store(Arc::new(inner));
        tracing::info!("Gateway rebuilt from new configuration");
    }
}

/// HTTP front end for the gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    pub fn new(config: GatewayConfig, services: GatewayServices) -> Self {
        let state = AppState::new(config.clone(), services);
        let router = Self::build_router(&config, state.clone());
        Self { router, state }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let mut router = Router::new()
            .route("/command/{action}", post(command_handler))
            .route("/token", get(token_handler))
            .with_state(state.clone());

        if config.admin.enabled {
            router = router.merge(setup_admin_router(state));
        }

        router
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.listener.request_timeout_secs,
            )))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(mark_request_start))
    }

    /// The router, for serving in-process.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve on `listener` until `shutdown` fires, applying configs from
    /// `config_updates` as they arrive.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                if config.listener.bind_address != state.inner.load().config.listener.bind_address {
                    tracing::warn!("Listener changes take effect after restart");
                }
                state.reload(config);
            }
        });

        let app = self
            .router
            .into_make_service_with_connect_info::<std::net::SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// `POST /command/{action}`
async fn command_handler(
    State(state): State<AppState>,
    Path(action): Path<String>,
    request: Request<Body>,
) -> Response {
    let caller = CallerInfo::from_request(&request);
    let start = request.extensions().get::<RequestStart>().map(|s| s.0);
    let inner = state.inner.load_full();
    let limit = inner.config.listener.max_body_bytes;
    let body = axum::body::to_bytes(request.into_body(), limit).await;

    respond(inner, start, move |inner, envelope| {
        let identity = inner.identities.identify(
            caller.session.as_deref(),
            &caller.ip,
            &caller.user_agent,
        );

        let parsed = match body {
            Ok(bytes) if bytes.is_empty() => Ok(CommandBody::default()),
            Ok(bytes) => serde_json::from_slice::<CommandBody>(&bytes).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        let body = match parsed {
            Ok(body) => body,
            Err(reason) => {
                let scope = LogScope::for_request(&identity, &action, envelope.request_id());
                inner.gateway.logger().log_ajax_error(
                    "malformed command body",
                    json!({ "reason": reason }),
                    &scope,
                );
                envelope.validation_error(
                    [("body".to_string(), "must be a JSON object".to_string())].into(),
                );
                return;
            }
        };

        let command = CommandRequest {
            action,
            payload: body.payload,
            token: body.nonce.or(caller.nonce),
            origin: caller.origin,
            referer: caller.referer,
        };
        inner.gateway.dispatch(&command, &identity, envelope);
    })
    .await
}

/// `GET /token`: a fresh anti-forgery token for an authenticated caller.
async fn token_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let caller = CallerInfo::from_request(&request);
    let start = request.extensions().get::<RequestStart>().map(|s| s.0);
    let inner = state.inner.load_full();

    respond(inner, start, move |inner, envelope| {
        let identity = inner.identities.identify(
            caller.session.as_deref(),
            &caller.ip,
            &caller.user_agent,
        );
        if identity.is_anonymous() {
            let scope = LogScope::for_request(&identity, "token", envelope.request_id());
            inner.gateway.logger().log_security_violation(
                ViolationType::InsufficientCapability,
                json!({ "action": "token", "detail": "anonymous token request" }),
                &scope,
            );
            envelope.security_error(ViolationType::InsufficientCapability);
            return;
        }
        envelope.success(
            json!({
                "nonce": inner.gateway.issue_token(&identity),
                "action": TokenService::action_name(),
                "lifetime_seconds": inner.config.security.token_lifetime_secs,
            }),
            "Token issued.",
            None,
        );
    })
    .await
}

/// Run `f` against a fresh envelope on the blocking pool and convert what
/// it transmitted.
async fn respond<F>(inner: Arc<InnerState>, start: Option<Instant>, f: F) -> Response
where
    F: FnOnce(&InnerState, &mut ResponseEnvelope) + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || {
        let slot = ResponseSlot::new();
        let mut envelope = inner.gateway.envelope(Box::new(slot.clone()), start);
        f(&inner, &mut envelope);
        slot.take()
    })
    .await;

    match result {
        Ok(Some(transmission)) => into_response(transmission),
        Ok(None) => {
            tracing::error!("Request finished without a transmission");
            fallback_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Command task failed");
            fallback_response()
        }
    }
}

fn into_response(transmission: Transmission) -> Response {
    let status =
        StatusCode::from_u16(transmission.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(transmission.body)).into_response();
    for (name, value) in transmission.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Dropping invalid response header"),
        }
    }
    response
}

fn fallback_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "success": false,
            "message": "An unexpected error occurred.",
            "code": "error",
            "data": null,
        })),
    )
        .into_response()
}
