//! Tracer configuration
//!
//! [`TracerConfig`] gathers the knobs of a reconstruction session. The parts
//! the per-thread state machines consult on every element live in
//! [`Heuristics`], which all stackers of a session share.

use std::rc::Rc;

/// How elements are grouped into logical threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaneMode {
    /// One stack per OS thread, selected by context-change elements
    #[default]
    Thread,
    /// One stack per trace-ID (i.e. per CPU), ignoring thread switches
    Cpu,
}

/// Symbol-name heuristics used by the stack reconstruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heuristics {
    /// Suffix marking procedure-linkage-table stubs
    pub plt_suffix: String,
    /// Symbols that discard part of the stack when they jump elsewhere
    /// (e.g. a runtime's long-jump used for exception delivery)
    pub rewinding_symbols: Vec<String>,
}

impl Heuristics {
    #[must_use]
    pub fn is_plt(&self, symbol: &str) -> bool {
        symbol.ends_with(&self.plt_suffix)
    }

    #[must_use]
    pub fn is_rewinding(&self, symbol: &str) -> bool {
        self.rewinding_symbols.iter().any(|s| s == symbol)
    }
}

impl Default for Heuristics {
    fn default() -> Self {
        Self {
            plt_suffix: "@plt".to_string(),
            rewinding_symbols: vec!["art_quick_do_long_jump".to_string()],
        }
    }
}

/// Configuration of a [`Tracer`](crate::tracer::Tracer) session
#[derive(Debug, Clone)]
pub struct TracerConfig {
    pub lane_mode: LaneMode,
    /// Path the address resolver reports for kernel addresses
    pub kernel_path: String,
    /// Binary name kernel symbols are looked up under
    pub kernel_binary: String,
    /// Name used when no symbol covers an address
    pub unknown_symbol: String,
    /// Category attached to every duration event
    pub category: Option<String>,
    pub heuristics: Rc<Heuristics>,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            lane_mode: LaneMode::Thread,
            kernel_path: "[kernel]".to_string(),
            kernel_binary: "[kernel.kallsyms]".to_string(),
            unknown_symbol: "Unknown".to_string(),
            category: None,
            heuristics: Rc::new(Heuristics::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plt_detection() {
        let h = Heuristics::default();
        assert!(h.is_plt("malloc@plt"));
        assert!(h.is_plt("@plt"));
        assert!(!h.is_plt("plt_helper"));
    }

    #[test]
    fn test_rewinding_symbols() {
        let h = Heuristics::default();
        assert!(h.is_rewinding("art_quick_do_long_jump"));
        assert!(!h.is_rewinding("art_quick_invoke_stub"));
    }
}
