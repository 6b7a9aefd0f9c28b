//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep trace-IDs, thread ids and timestamps from being
//! mixed up, and make function signatures more expressive.

use std::fmt;

/// Hardware trace source id
///
/// Every ETM trace source (one per CPU) tags its data with a trace-ID. Address
/// maps and per-CPU lanes are looked up by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(pub u8);

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TRACE:{}", self.0)
    }
}

/// Process ID
///
/// `-1` stands for a process that could not be identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub i64);

impl Pid {
    pub const UNKNOWN: Pid = Pid(-1);
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

impl From<u32> for Pid {
    fn from(pid: u32) -> Self {
        Pid(i64::from(pid))
    }
}

/// Thread ID
///
/// `-1` stands for a thread that could not be identified; all such elements
/// share one logical thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(pub i64);

impl Tid {
    pub const UNKNOWN: Tid = Tid(-1);
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

impl From<u32> for Tid {
    fn from(tid: u32) -> Self {
        Tid(i64::from(tid))
    }
}

/// Trace timestamp
///
/// Units are whatever the trace source counts in (monotonic, not wall-clock).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Convert to microseconds given the number of source ticks per microsecond
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn as_micros(self, ticks_per_us: f64) -> f64 {
        self.0 as f64 / ticks_per_us
    }
}

impl From<u64> for Timestamp {
    fn from(ts: u64) -> Self {
        Timestamp(ts)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}
