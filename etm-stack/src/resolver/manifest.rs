//! File-backed resolver
//!
//! A manifest is a JSON description of a recording:
//!
//! ```json
//! {
//!   "maps": [
//!     { "start": 4194304, "end": 4259840, "path": "/system/bin/app", "pgoff": 0 },
//!     { "trace_id": 16, "start": 18446603336221196288, "end": 18446603336300000000, "path": "[kernel]" }
//!   ],
//!   "symbols": { "/system/bin/app": [ { "addr": 4096, "len": 64, "name": "main" } ] },
//!   "plt": { "/system/bin/app": [ { "addr": 1056, "len": 16, "name": "malloc@plt" } ] },
//!   "build_ids": { "/system/bin/app": "3f2a..." },
//!   "threads": [ { "pid": 100, "tid": 101, "comm": "worker" } ]
//! }
//! ```
//!
//! Maps without a `trace_id` apply to every trace source. Binaries that have
//! no symbol table in the manifest are looked up in the binary cache, if one
//! is configured.

use log::{info, warn};
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{AddressResolver, MappedAddress, Symbol, ThreadInfo, ThreadRegistry};
use crate::domain::{Pid, ResolveError, Tid, TraceId};
use crate::symbolization::ElfSymbols;

/// A mapping of part of a binary into the traced address space
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MemoryMap {
    /// Trace source the mapping applies to, all of them if unset
    #[serde(default)]
    pub trace_id: Option<u8>,
    pub start: u64,
    pub end: u64,
    pub path: String,
    /// Offset of `start` within the binary
    #[serde(default)]
    pub pgoff: u64,
}

impl MemoryMap {
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    fn applies_to(&self, trace_id: TraceId) -> bool {
        self.trace_id.is_none_or(|id| id == trace_id.0)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ThreadEntry {
    pid: i64,
    tid: i64,
    comm: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ManifestFile {
    maps: Vec<MemoryMap>,
    symbols: HashMap<String, Vec<Symbol>>,
    plt: HashMap<String, Vec<Symbol>>,
    build_ids: HashMap<String, String>,
    threads: Vec<ThreadEntry>,
}

/// [`AddressResolver`] and [`ThreadRegistry`] backed by a manifest file
#[derive(Debug, Default)]
pub struct Manifest {
    maps: Vec<MemoryMap>,
    symbols: HashMap<String, Vec<Symbol>>,
    plt: HashMap<String, Vec<Symbol>>,
    build_ids: HashMap<String, String>,
    threads: HashMap<Tid, ThreadInfo>,
    binary_cache: Option<PathBuf>,
    /// Binaries read from the cache so far; `None` if unreadable
    loaded: RefCell<HashMap<String, Option<ElfSymbols>>>,
}

impl Manifest {
    /// Parse a manifest from JSON text
    ///
    /// # Errors
    /// Returns an error if `json` is not a valid manifest.
    pub fn from_json(json: &str) -> Result<Self, ResolveError> {
        let file: ManifestFile = serde_json::from_str(json)?;
        Ok(Self::from_file(file))
    }

    /// Read a manifest file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ResolveError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ResolveError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest = Self::from_json(&json)?;
        info!(
            "Loaded manifest {}: {} maps, {} symbol tables, {} threads",
            path.display(),
            manifest.maps.len(),
            manifest.symbols.len(),
            manifest.threads.len()
        );
        Ok(manifest)
    }

    /// Look up binaries without a symbol table under `dir`
    ///
    /// A binary at `/system/lib64/libc.so` is expected at
    /// `<dir>/system/lib64/libc.so`.
    #[must_use]
    pub fn with_binary_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.binary_cache = Some(dir.into());
        self
    }

    fn cached_binary<T>(&self, path: &str, f: impl FnOnce(&ElfSymbols) -> T) -> Option<T> {
        let dir = self.binary_cache.as_ref()?;
        let mut loaded = self.loaded.borrow_mut();
        let entry = loaded.entry(path.to_string()).or_insert_with(|| {
            let file = dir.join(path.trim_start_matches('/'));
            match ElfSymbols::load(&file) {
                Ok(symbols) => Some(symbols),
                Err(e) => {
                    warn!("No usable binary for {path} in the binary cache: {e}");
                    None
                }
            }
        });
        entry.as_ref().map(f)
    }

    fn from_file(file: ManifestFile) -> Self {
        let threads = file
            .threads
            .into_iter()
            .map(|t| {
                let info = ThreadInfo {
                    pid: Pid(t.pid),
                    tid: Tid(t.tid),
                    comm: t.comm,
                };
                (info.tid, info)
            })
            .collect();

        Self {
            maps: file.maps,
            symbols: file.symbols,
            plt: file.plt,
            build_ids: file.build_ids,
            threads,
            binary_cache: None,
            loaded: RefCell::default(),
        }
    }
}

impl AddressResolver for Manifest {
    fn resolve(&self, trace_id: TraceId, addr: u64) -> Option<MappedAddress> {
        let map = self
            .maps
            .iter()
            .find(|map| map.applies_to(trace_id) && map.contains(addr))?;
        // A pgoff pushing the offset past u64 cannot be a real mapping
        let offset = (addr - map.start).checked_add(map.pgoff)?;
        Some(MappedAddress {
            path: map.path.clone(),
            offset,
        })
    }

    fn symbols(&self, path: &str) -> Option<Vec<Symbol>> {
        if let Some(symbols) = self.symbols.get(path) {
            return Some(symbols.clone());
        }
        self.cached_binary(path, |elf| elf.functions.clone())
    }

    fn plt_symbols(&self, path: &str) -> Option<Vec<Symbol>> {
        if let Some(plt) = self.plt.get(path) {
            return Some(plt.clone());
        }
        self.cached_binary(path, |elf| elf.plt.clone()).flatten()
    }

    fn build_id(&self, path: &str) -> Option<String> {
        if let Some(id) = self.build_ids.get(path) {
            return Some(id.clone());
        }
        self.cached_binary(path, |elf| elf.build_id.clone())
            .flatten()
    }
}

impl ThreadRegistry for Manifest {
    fn thread(&self, tid: Tid) -> Option<ThreadInfo> {
        self.threads.get(&tid).cloned()
    }
}
