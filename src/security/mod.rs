//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming command:
//!     → identity.rs (resolve caller from session)
//!     → gate.rs, in order:
//!         1. token.rs (anti-forgery token for the shared action)
//!         2. capability held by the identity
//!         3. validation (threat scan, then sanitation)
//!         4. Origin / Referer against the expected host
//!         5. rate_limit.rs (sliding window per action, user and address)
//!     → handler, with the sanitized payload
//! ```
//!
//! # Design Decisions
//! - Fail closed: the first failing check ends the request
//! - Every failure becomes a classified `violation.rs` record
//! - The rate limiter fails open when its store is unavailable

pub mod gate;
pub mod identity;
pub mod rate_limit;
pub mod token;
pub mod violation;

pub use gate::{Admission, CommandRequest, GateError, GateOptions, SecurityGate};
pub use identity::{ConfiguredUsers, Identity, IdentityProvider};
pub use rate_limit::{RateDecision, RateLimiter};
pub use token::{TokenAge, TokenService, TOKEN_ACTION};
pub use violation::{RateLimitInfo, SecurityViolation, Severity, ViolationType};
