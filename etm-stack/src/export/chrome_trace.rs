use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::io::Write;

use super::{ThreadHandle, TraceWriter};
use crate::domain::{ExportError, Timestamp};

/// Chrome Trace Event format
/// Spec: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU/preview
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChromeTraceEvent {
    /// Function name, or the metadata record name for "M" events
    name: String,
    /// Category for filtering/coloring
    cat: String,
    /// Phase: "B" = begin, "E" = end, "M" = metadata
    ph: String,
    /// Timestamp in microseconds
    ts: f64,
    pid: u32,
    tid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<HashMap<String, JsonValue>>,
}

/// Chrome Trace Format container
#[derive(Debug, Serialize)]
struct ChromeTrace<'a> {
    #[serde(rename = "traceEvents")]
    trace_events: Vec<&'a ChromeTraceEvent>,
    #[serde(rename = "displayTimeUnit")]
    display_time_unit: &'static str,
}

#[derive(Debug)]
struct ThreadSlot {
    pid: u32,
    tid: u32,
    last: Option<Timestamp>,
}

/// [`TraceWriter`] collecting events in the Chrome Trace Event Format
///
/// Processes and threads are identified by name; ids are handed out in
/// registration order starting at 1.
pub struct ChromeTraceWriter {
    /// Source ticks per microsecond
    scale: f64,
    events: Vec<ChromeTraceEvent>,
    metadata: Vec<ChromeTraceEvent>,
    processes: HashMap<String, u32>,
    threads: HashMap<(u32, String), ThreadHandle>,
    slots: Vec<ThreadSlot>,
}

impl Default for ChromeTraceWriter {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl ChromeTraceWriter {
    /// Create a writer for timestamps counting `ticks_per_us` per microsecond
    #[must_use]
    pub fn new(ticks_per_us: f64) -> Self {
        Self {
            scale: ticks_per_us,
            events: Vec::new(),
            metadata: Vec::new(),
            processes: HashMap::new(),
            threads: HashMap::new(),
            slots: Vec::new(),
        }
    }

    fn metadata_event(kind: &str, pid: u32, tid: u32, name: &str) -> ChromeTraceEvent {
        let mut args = HashMap::new();
        args.insert("name".to_string(), serde_json::json!(name));
        ChromeTraceEvent {
            name: kind.to_string(),
            cat: String::new(),
            ph: "M".to_string(),
            ts: 0.0,
            pid,
            tid,
            args: Some(args),
        }
    }

    fn process(&mut self, name: &str) -> Result<u32, ExportError> {
        if let Some(pid) = self.processes.get(name) {
            return Ok(*pid);
        }
        let pid = u32::try_from(self.processes.len() + 1)
            .map_err(|_| ExportError::TooManyThreads)?;
        self.processes.insert(name.to_string(), pid);
        self.metadata
            .push(Self::metadata_event("process_name", pid, 0, name));
        Ok(pid)
    }

    /// Export the trace to any writer (file, stdout, buffer, etc.)
    ///
    /// # Errors
    /// Returns an error if serialization or writing fails.
    pub fn export<W: Write>(&self, writer: W) -> Result<(), ExportError> {
        let trace = ChromeTrace {
            trace_events: self.metadata.iter().chain(self.events.iter()).collect(),
            display_time_unit: "ms",
        };
        serde_json::to_writer_pretty(writer, &trace)?;
        Ok(())
    }

    /// Number of duration events collected
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.slots.len()
    }
}

impl TraceWriter for ChromeTraceWriter {
    fn thread(&mut self, process: &str, thread: &str) -> Result<ThreadHandle, ExportError> {
        let pid = self.process(process)?;
        if let Some(handle) = self.threads.get(&(pid, thread.to_string())) {
            return Ok(*handle);
        }

        let tid = u32::try_from(self.slots.len() + 1)
            .map_err(|_| ExportError::TooManyThreads)?;
        let handle = ThreadHandle(tid - 1);
        self.slots.push(ThreadSlot {
            pid,
            tid,
            last: None,
        });
        self.threads.insert((pid, thread.to_string()), handle);
        self.metadata
            .push(Self::metadata_event("thread_name", pid, tid, thread));
        debug!("Registered thread '{thread}' of '{process}' as {pid}/{tid}");
        Ok(handle)
    }

    fn duration(
        &mut self,
        begin: bool,
        thread: ThreadHandle,
        category: Option<&str>,
        name: &str,
        timestamp: Timestamp,
    ) -> Result<(), ExportError> {
        let slot = self
            .slots
            .get_mut(thread.0 as usize)
            .ok_or(ExportError::UnknownThread(thread.0))?;
        if let Some(previous) = slot.last.filter(|previous| *previous > timestamp) {
            return Err(ExportError::TimestampRegression {
                thread: thread.0,
                previous,
                current: timestamp,
            });
        }
        slot.last = Some(timestamp);

        self.events.push(ChromeTraceEvent {
            name: name.to_string(),
            cat: category.unwrap_or_default().to_string(),
            ph: if begin { "B" } else { "E" }.to_string(),
            ts: timestamp.as_micros(self.scale),
            pid: slot.pid,
            tid: slot.tid,
            args: None,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_handles_are_stable() {
        let mut w = ChromeTraceWriter::default();
        let a = w.thread("100 app", "101 worker").unwrap();
        let b = w.thread("100 app", "102 io").unwrap();
        assert_ne!(a, b);
        assert_eq!(w.thread("100 app", "101 worker").unwrap(), a);
        assert_eq!(w.thread_count(), 2);
    }

    #[test]
    fn test_unknown_thread() {
        let mut w = ChromeTraceWriter::default();
        let err = w
            .duration(true, ThreadHandle(3), None, "main", Timestamp(1))
            .unwrap_err();
        assert!(matches!(err, ExportError::UnknownThread(3)));
    }

    #[test]
    fn test_per_thread_monotonic() {
        let mut w = ChromeTraceWriter::default();
        let a = w.thread("p", "a").unwrap();
        let b = w.thread("p", "b").unwrap();
        w.duration(true, a, None, "main", Timestamp(10)).unwrap();
        // Other threads have their own clock
        w.duration(true, b, None, "main", Timestamp(5)).unwrap();
        w.duration(false, a, None, "main", Timestamp(10)).unwrap();
        let err = w.duration(true, a, None, "next", Timestamp(9)).unwrap_err();
        assert!(matches!(err, ExportError::TimestampRegression { .. }));
        assert_eq!(w.event_count(), 3);
    }

    #[test]
    fn test_scale_and_phases() {
        let mut w = ChromeTraceWriter::new(1000.0);
        let t = w.thread("p", "t").unwrap();
        w.duration(true, t, Some("etm"), "main", Timestamp(1500))
            .unwrap();
        w.duration(false, t, Some("etm"), "main", Timestamp(3000))
            .unwrap();

        let mut buffer = Vec::new();
        w.export(&mut buffer).unwrap();
        let parsed: JsonValue = serde_json::from_slice(&buffer).unwrap();
        let events = parsed["traceEvents"].as_array().unwrap();

        let durations: Vec<_> = events.iter().filter(|e| e["ph"] != "M").collect();
        assert_eq!(durations.len(), 2);
        assert_eq!(durations[0]["ph"], "B");
        assert_eq!(durations[0]["ts"], 1.5);
        assert_eq!(durations[0]["cat"], "etm");
        assert_eq!(durations[1]["ph"], "E");
        assert_eq!(durations[1]["ts"], 3.0);
    }
}
