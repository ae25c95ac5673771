//! Input validation subsystem.
//!
//! # Data Flow
//! ```text
//! raw payload
//!     → threats.rs (refuse script / SQL injection outright)
//!     → validator.rs (per key: normalize key, resolve rule, structural checks)
//!     → sanitizers.rs (type tag → sanitizer)
//!     → sanitized copy handed to the command handler
//!
//! Later, when re-emitting stored values:
//!     → escape.rs (context-aware output escaping)
//! ```
//!
//! # Design Decisions
//! - Pure functions: the caller's payload is never modified
//! - Rules resolve explicit → global default → plain text
//! - Sanitizers are looked up in a registry keyed by type tag

pub mod escape;
pub mod rules;
pub mod sanitizers;
pub mod threats;
pub mod validator;

pub use escape::{escape, EscapeContext};
pub use rules::{FieldRule, FieldType, RuleSet};
pub use sanitizers::{boolean_of, Sanitizer, SanitizerRegistry};
pub use threats::ThreatMatch;
pub use validator::{InputValidator, ValidationError};
