//! Observability for the device client
//!
//! Structured logging through tracing-subscriber, configured from the
//! environment.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::session_span;
