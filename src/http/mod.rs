//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (start mark, caller info, body)
//!     → Gateway::dispatch on the blocking pool
//!     → response.rs (envelope → transmission)
//!     → server.rs (transmission → HTTP response)
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestStart, X_GATEWAY_NONCE};
pub use response::{ResponseChannel, ResponseCode, ResponseEnvelope, ResponseSlot, Transmission};
pub use server::{AppState, HttpServer};
