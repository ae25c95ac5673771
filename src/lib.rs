//! Command Gateway Library
//!
//! The security and response gateway every privileged command passes
//! through: anti-forgery tokens, capability and origin checks, sliding-window
//! rate limiting, type-driven input sanitation, a single-transmission
//! response envelope, and an error/violation classifier with rotation and
//! alerting.
//!
//! # Architecture Overview
//!
//! ```text
//!   POST /command/{action}
//!          │
//!          ▼
//!   ┌─────────────┐   ┌──────────────────────────────────────────┐
//!   │ http server │──▶│ Gateway::dispatch                        │
//!   └─────────────┘   │   SecurityGate: token → capability →     │
//!                     │     input → origin → rate                │
//!                     │   CommandHandler (sanitized payload)     │
//!                     │   ResponseEnvelope (exactly one send)    │
//!                     └───────────────┬──────────────────────────┘
//!                                     │ failures
//!                                     ▼
//!                     ┌──────────────────────────────────────────┐
//!                     │ ErrorLogger: tracing, rotating file,     │
//!                     │   ring-buffer history, critical alerts   │
//!                     └──────────────────────────────────────────┘
//! ```

pub mod admin;
pub mod config;
pub mod gateway;
pub mod handlers;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;
pub mod store;
pub mod validation;

pub use config::schema::GatewayConfig;
pub use gateway::{Gateway, GatewayServices};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
