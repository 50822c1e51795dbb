//! Observability: structured logging and session spans

pub mod logging;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{operation_span, session_span};
