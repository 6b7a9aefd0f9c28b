//! Structured error types for etm-stack
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::Timestamp;
use std::path::PathBuf;
use thiserror::Error;

/// Violations of the stack reconstruction protocol
///
/// None of these are repaired automatically: they indicate either a
/// reconstruction bug or a control transfer the heuristics do not model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error(
        "Top of the stack does not match the function being returned from! \
         Current function: {symbol}, top of the stack: {top}"
    )]
    Mismatch { symbol: String, top: String },

    #[error("Return from {0} with an empty stack")]
    Underflow(String),

    #[error("New call to {symbol} while an exception is still on the stack: [{}]", .stack.join(", "))]
    NestedException { symbol: String, stack: Vec<String> },

    #[error("Timestamps went backwards: {current} after {previous}")]
    TimestampRegression {
        previous: Timestamp,
        current: Timestamp,
    },
}

#[derive(Error, Debug)]
pub enum TraceError {
    #[error(
        "Wrong binary! Unconditional branch at {offset:#x} in {path} (build id: {}) was not taken!",
        .build_id.as_deref().unwrap_or("unknown")
    )]
    WrongBinary {
        path: String,
        offset: u64,
        build_id: Option<String>,
    },

    #[error(transparent)]
    Stack(#[from] StackError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse ELF file {path}: {reason}")]
    ElfParse { path: PathBuf, reason: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ElementError {
    #[error("Failed to read element stream: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid element on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Unknown thread handle {0}")]
    UnknownThread(u32),

    #[error("Too many threads for one trace")]
    TooManyThreads,

    #[error("Timestamps of thread {thread} went backwards: {current} after {previous}")]
    TimestampRegression {
        thread: u32,
        previous: Timestamp,
        current: Timestamp,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
