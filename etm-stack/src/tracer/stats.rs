use std::fmt;

/// Counters of one reconstruction session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TracerStats {
    pub elements: u64,
    pub instr_ranges: u64,
    pub exceptions: u64,
    /// Trace-on and no-sync markers
    pub gaps: u64,
    /// Runs of inaccessible or unmappable addresses
    pub lost_decodes: u64,
    /// Elements that arrived before a thread was known on their lane
    pub orphaned: u64,
    pub threads: u64,
    /// Duration events handed to the writer
    pub events: u64,
}

impl fmt::Display for TracerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stats: elements={} ranges={} exceptions={} gaps={} lost_decodes={} orphaned={} threads={} events={}",
            self.elements,
            self.instr_ranges,
            self.exceptions,
            self.gaps,
            self.lost_decodes,
            self.orphaned,
            self.threads,
            self.events
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let stats = TracerStats {
            elements: 3,
            events: 2,
            ..TracerStats::default()
        };
        let line = stats.to_string();
        assert!(line.starts_with("stats: elements=3 "));
        assert!(line.ends_with(" events=2"));
    }
}
