//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     SIGINT / SIGTERM → trigger → server stops accepting → drains → exit
//! ```
//!
//! # Design Decisions
//! - One broadcast channel; every long-running task subscribes
//! - Signals are translated into a trigger, never handled inline

pub mod shutdown;

pub use shutdown::{wait_for_signal, Shutdown};
