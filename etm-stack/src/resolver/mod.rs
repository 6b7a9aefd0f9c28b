//! # Address and Thread Resolution
//!
//! The tracer never reads binaries or recording metadata itself. It asks two
//! collaborators:
//!
//! - an [`AddressResolver`] that maps a traced virtual address to a
//!   `(binary path, file offset)` pair and provides symbol tables per binary
//! - a [`ThreadRegistry`] that knows process id and command name per thread
//!
//! [`Manifest`] implements both from a JSON description of the recording,
//! optionally backed by a directory of binaries.
//!
//! ```text
//!  trace address ──▶ AddressResolver::resolve ──▶ (path, offset)
//!                                                     │
//!                   AddressResolver::symbols(path) ◀──┘
//!                                │
//!                                ▼
//!                  SymbolCache::symbol_at ──▶ "function name"
//! ```

pub mod manifest;

pub use manifest::Manifest;

use serde::{Deserialize, Serialize};

use crate::domain::{Pid, Tid, TraceId};

/// An address translated into a binary-relative location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedAddress {
    pub path: String,
    /// Offset of the address in the binary's virtual address space
    pub offset: u64,
}

/// A function symbol covering `[addr, addr + len)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub addr: u64,
    pub len: u64,
    pub name: String,
}

impl Symbol {
    pub fn new(addr: u64, len: u64, name: impl Into<String>) -> Self {
        Self {
            addr,
            len,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.addr && offset - self.addr < self.len
    }
}

/// What is known about a recorded thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub pid: Pid,
    pub tid: Tid,
    pub comm: String,
}

/// Source of address translation and symbol tables
pub trait AddressResolver {
    /// Translate an address traced on `trace_id`
    fn resolve(&self, trace_id: TraceId, addr: u64) -> Option<MappedAddress>;

    /// Symbol table of a binary, in any order
    fn symbols(&self, path: &str) -> Option<Vec<Symbol>>;

    /// Individual PLT stubs of a binary whose symbol table only carries one
    /// aggregate `@plt` entry
    fn plt_symbols(&self, _path: &str) -> Option<Vec<Symbol>> {
        None
    }

    fn build_id(&self, _path: &str) -> Option<String> {
        None
    }
}

/// Source of thread metadata
pub trait ThreadRegistry {
    fn thread(&self, tid: Tid) -> Option<ThreadInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_contains() {
        let sym = Symbol::new(0x1000, 0x10, "main");
        assert!(sym.contains(0x1000));
        assert!(sym.contains(0x100f));
        assert!(!sym.contains(0x1010));
        assert!(!sym.contains(0x0fff));
    }

    #[test]
    fn test_empty_symbol_contains_nothing() {
        let sym = Symbol::new(0x1000, 0, "marker");
        assert!(!sym.contains(0x1000));
    }
}
