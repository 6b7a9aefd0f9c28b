//! Per-lane tracking of the processing-element context
//!
//! Context-change elements are emitted whenever the decoder resynchronizes,
//! not only when the running thread changes. [`ContextTracker`] folds them
//! into the currently known (tid, pid, exception level) and reports whether
//! anything actually changed.

use etm_stack_common::{ExceptionLevel, PeContext};

use crate::domain::{Pid, Tid};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextTracker {
    tid: Option<u32>,
    pid: Option<u32>,
    exception_level: Option<ExceptionLevel>,
}

impl ContextTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a context-change element
    ///
    /// Fields the element does not mark valid keep their previous value.
    /// Returns true if the thread, process or exception level changed.
    pub fn update(&mut self, context: &PeContext) -> bool {
        let mut changed = false;

        if let Some(tid) = context.tid() {
            changed |= self.tid.replace(tid) != Some(tid);
        }
        if let Some(pid) = context.pid() {
            changed |= self.pid.replace(pid) != Some(pid);
        }
        let level = context.exception_level;
        changed |= self.exception_level.replace(level) != Some(level);

        changed
    }

    /// Forget everything, e.g. after the trace lost synchronization
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Current thread id, if known
    #[must_use]
    pub fn tid(&self) -> Option<Tid> {
        self.tid.map(Tid::from)
    }

    #[must_use]
    pub fn pid(&self) -> Option<Pid> {
        self.pid.map(Pid::from)
    }

    /// True once a context has been seen and the core runs above EL0
    #[must_use]
    pub fn is_kernel(&self) -> bool {
        self.exception_level
            .is_some_and(ExceptionLevel::is_privileged)
    }
}
