//! Domain model for etm-stack
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Self-documenting function signatures
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{Pid, Tid, Timestamp, TraceId};

pub use errors::{ElementError, ExportError, ResolveError, StackError, TraceError};
