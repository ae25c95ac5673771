//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway / SecurityGate / handlers produce:
//!     → logging.rs (classify, redact, fan out)
//!         → tracing event (host log sink)
//!         → rotation.rs (JSON lines, size-rotated)
//!         → store::RingBuffer (bounded histories)
//!         → alert.rs (critical severity only)
//!     → metrics.rs (counters, histograms)
//! ```
//!
//! # Design Decisions
//! - Structured logging through `tracing`
//! - Request ID flows from the envelope into every record
//! - Metrics are cheap and optional

pub mod alert;
pub mod logging;
pub mod memory;
pub mod metrics;
pub mod redact;
pub mod rotation;

pub use alert::{LogNotifier, MemoryNotifier, Notifier, NotifyError, SentAlert, WebhookNotifier};
pub use logging::{
    AlertSettings, ErrorCategory, ErrorLogger, ErrorRecord, LogScope, ViolationRecord,
    ERRORS_OPTION, VIOLATIONS_OPTION,
};
pub use memory::{memory_usage, MemoryUsage};
pub use rotation::RotatingFile;
