//! Trace export functionality
//!
//! The tracer writes through the [`TraceWriter`] trait: it registers each
//! logical thread once and then reports begin/end pairs of durations on it.
//! Currently the Chrome Trace Event Format is supported, for visualization in
//! chrome://tracing or Perfetto.

pub mod chrome_trace;

pub use chrome_trace::ChromeTraceWriter;

use crate::domain::{ExportError, Timestamp};

/// Opaque handle of a thread registered with a [`TraceWriter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadHandle(pub u32);

/// Sink for reconstructed durations
pub trait TraceWriter {
    /// Register (or look up) the thread `thread` of process `process`
    ///
    /// The same pair of names always yields the same handle.
    ///
    /// # Errors
    /// Returns an error if the writer cannot accept more threads.
    fn thread(&mut self, process: &str, thread: &str) -> Result<ThreadHandle, ExportError>;

    /// Begin (`begin == true`) or end a duration called `name`
    ///
    /// # Errors
    /// Returns an error for unknown handles or if the writer rejects the
    /// event.
    fn duration(
        &mut self,
        begin: bool,
        thread: ThreadHandle,
        category: Option<&str>,
        name: &str,
        timestamp: Timestamp,
    ) -> Result<(), ExportError>;
}
