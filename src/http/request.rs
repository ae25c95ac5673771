//! Request intake helpers.
//!
//! # Responsibilities
//! - Capture the request-start mark before anything else runs
//! - Pull the caller's session, address and agent out of the request
//! - Pull the anti-forgery token from the body or the nonce header
//!
//! # Design Decisions
//! - The start mark is the outermost layer so envelope timing covers the
//!   whole request, body read included

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use serde_json::Value;

/// Header carrying the anti-forgery token when the body does not.
pub const X_GATEWAY_NONCE: &str = "x-gateway-nonce";

/// Instant the request entered the server.
#[derive(Debug, Clone, Copy)]
pub struct RequestStart(pub Instant);

/// Middleware stamping every request with a `RequestStart`.
pub async fn mark_request_start(mut request: Request<Body>, next: Next) -> Response {
    request.extensions_mut().insert(RequestStart(Instant::now()));
    next.run(request).await
}

/// JSON body of `POST /command/{action}`.
#[derive(Debug, Default, Deserialize)]
pub struct CommandBody {
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

/// Caller attributes read from the transport.
#[derive(Debug, Clone, Default)]
pub struct CallerInfo {
    pub session: Option<String>,
    pub ip: String,
    pub user_agent: String,
    pub nonce: Option<String>,
    pub origin: Option<String>,
    pub referer: Option<String>,
}

impl CallerInfo {
    pub fn from_request(request: &Request<Body>) -> Self {
        let headers = request.headers();
        let ip = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_default();
        Self {
            session: bearer(headers),
            ip,
            user_agent: header_str(headers, header::USER_AGENT.as_str()).unwrap_or_default(),
            nonce: header_str(headers, X_GATEWAY_NONCE),
            origin: header_str(headers, header::ORIGIN.as_str()),
            referer: header_str(headers, header::REFERER.as_str()),
        }
    }
}

/// Token from `Authorization: Bearer <token>`.
pub fn bearer(headers: &HeaderMap) -> Option<String> {
    header_str(headers, header::AUTHORIZATION.as_str())
        .and_then(|v| v.strip_prefix("Bearer ").map(|t| t.trim().to_string()))
        .filter(|t| !t.is_empty())
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
