use log::warn;
use std::collections::HashMap;

use super::elf::PLT_AGGREGATE;
use crate::config::TracerConfig;
use crate::resolver::{AddressResolver, Symbol};

/// Lazily loaded, per-binary symbol lookup
///
/// Consecutive ranges usually stay in one function, so the last hit is kept
/// and checked before any table search.
#[derive(Debug)]
pub struct SymbolCache {
    kernel_path: String,
    kernel_binary: String,
    /// Sorted tables per binary; `None` if the resolver had none
    tables: HashMap<String, Option<Vec<Symbol>>>,
    hot: Option<(String, Symbol)>,
}

impl SymbolCache {
    pub fn new(kernel_path: impl Into<String>, kernel_binary: impl Into<String>) -> Self {
        Self {
            kernel_path: kernel_path.into(),
            kernel_binary: kernel_binary.into(),
            tables: HashMap::new(),
            hot: None,
        }
    }

    #[must_use]
    pub fn from_config(config: &TracerConfig) -> Self {
        Self::new(config.kernel_path.as_str(), config.kernel_binary.as_str())
    }

    /// Name of the function covering `offset` in the binary at `path`
    pub fn symbol_at<R: AddressResolver + ?Sized>(
        &mut self,
        resolver: &R,
        path: &str,
        offset: u64,
    ) -> Option<String> {
        let binary = if path == self.kernel_path {
            self.kernel_binary.as_str()
        } else {
            path
        };

        if let Some((hot_binary, sym)) = &self.hot {
            if hot_binary == binary && sym.contains(offset) {
                return Some(sym.name.clone());
            }
        }

        let binary = binary.to_string();
        let table = self
            .tables
            .entry(binary.clone())
            .or_insert_with(|| load_table(resolver, &binary))
            .as_ref()?;

        let i = table.partition_point(|sym| sym.addr <= offset);
        let sym = table[..i].last().filter(|sym| sym.contains(offset))?;
        let name = sym.name.clone();
        self.hot = Some((binary, sym.clone()));
        Some(name)
    }
}

fn load_table<R: AddressResolver + ?Sized>(resolver: &R, binary: &str) -> Option<Vec<Symbol>> {
    let Some(mut symbols) = resolver.symbols(binary) else {
        warn!("Can't find symbols for unknown binary '{binary}'");
        return None;
    };

    // Other tools only need the PLT as one symbol; split it up if we can.
    if symbols.iter().any(|sym| sym.name == PLT_AGGREGATE) {
        if let Some(stubs) = resolver
            .plt_symbols(binary)
            .filter(|stubs| !stubs.is_empty())
        {
            symbols.retain(|sym| sym.name != PLT_AGGREGATE);
            symbols.extend(stubs);
        }
    }

    symbols.sort_by_key(|sym| sym.addr);
    Some(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TraceId;
    use crate::resolver::MappedAddress;
    use std::cell::Cell;

    #[derive(Default)]
    struct Tables {
        loads: Cell<usize>,
        with_plt: bool,
    }

    impl AddressResolver for Tables {
        fn resolve(&self, _: TraceId, _: u64) -> Option<MappedAddress> {
            None
        }

        fn symbols(&self, path: &str) -> Option<Vec<Symbol>> {
            self.loads.set(self.loads.get() + 1);
            match path {
                "/bin/app" => Some(vec![
                    Symbol::new(0x2000, 0x100, "second"),
                    Symbol::new(0x1000, 0x100, "first"),
                    Symbol::new(0x500, 0x40, PLT_AGGREGATE),
                ]),
                "[kernel.kallsyms]" => Some(vec![Symbol::new(0x8000, 0x1000, "do_syscall")]),
                _ => None,
            }
        }

        fn plt_symbols(&self, _: &str) -> Option<Vec<Symbol>> {
            self.with_plt.then(|| {
                vec![
                    Symbol::new(0x520, 0x10, "malloc@plt"),
                    Symbol::new(0x530, 0x10, "free@plt"),
                ]
            })
        }
    }

    fn cache() -> SymbolCache {
        SymbolCache::from_config(&TracerConfig::default())
    }

    #[test]
    fn test_lookup_by_containment() {
        let r = Tables::default();
        let mut c = cache();
        assert_eq!(
            c.symbol_at(&r, "/bin/app", 0x1000).as_deref(),
            Some("first")
        );
        assert_eq!(
            c.symbol_at(&r, "/bin/app", 0x20ff).as_deref(),
            Some("second")
        );
        assert_eq!(c.symbol_at(&r, "/bin/app", 0x1100), None);
        assert_eq!(c.symbol_at(&r, "/bin/app", 0x10), None);
    }

    #[test]
    fn test_table_loaded_once() {
        let r = Tables::default();
        let mut c = cache();
        c.symbol_at(&r, "/bin/app", 0x1000);
        c.symbol_at(&r, "/bin/app", 0x2000);
        c.symbol_at(&r, "/bin/missing", 0x0);
        c.symbol_at(&r, "/bin/missing", 0x0);
        assert_eq!(r.loads.get(), 2);
    }

    #[test]
    fn test_kernel_path_uses_kallsyms() {
        let r = Tables::default();
        let mut c = cache();
        assert_eq!(
            c.symbol_at(&r, "[kernel]", 0x8010).as_deref(),
            Some("do_syscall")
        );
    }

    #[test]
    fn test_plt_aggregate_is_expanded() {
        let r = Tables {
            with_plt: true,
            ..Tables::default()
        };
        let mut c = cache();
        assert_eq!(
            c.symbol_at(&r, "/bin/app", 0x534).as_deref(),
            Some("free@plt")
        );
        assert_eq!(c.symbol_at(&r, "/bin/app", 0x500), None);
    }

    #[test]
    fn test_plt_aggregate_kept_without_stubs() {
        let r = Tables::default();
        let mut c = cache();
        assert_eq!(
            c.symbol_at(&r, "/bin/app", 0x534).as_deref(),
            Some(PLT_AGGREGATE)
        );
    }
}
