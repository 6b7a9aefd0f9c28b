//! Function symbols from ELF binaries
//!
//! Used when the manifest has no symbol table for a binary but a copy of the
//! binary is available in the binary cache.

use log::debug;
use object::{
    Architecture, Object, ObjectSection, ObjectSymbol, ObjectSymbolTable, RelocationFlags,
    RelocationTarget, SymbolKind,
};
use rustc_demangle::demangle;
use std::fs;
use std::path::Path;

use crate::domain::ResolveError;
use crate::resolver::Symbol;

/// Name of the single symbol covering the whole `.plt` section
pub const PLT_AGGREGATE: &str = "@plt";

/// AArch64 PLT layout: a 32 byte header followed by 16 byte stubs
const AARCH64_PLT_HEADER: u64 = 32;
const AARCH64_PLT_ENTRY: u64 = 16;

/// Symbols read from one binary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElfSymbols {
    /// Function symbols sorted by address, with the `@plt` aggregate last
    pub functions: Vec<Symbol>,
    /// Individual PLT stubs, when the architecture's PLT layout is known
    pub plt: Option<Vec<Symbol>>,
    /// GNU build id as lowercase hex
    pub build_id: Option<String>,
}

impl ElfSymbols {
    /// Read the symbols of the binary at `path`
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid object
    /// file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ResolveError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| ResolveError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&data).map_err(|e| ResolveError::ElfParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Read the symbols of an in-memory binary
    ///
    /// # Errors
    /// Returns the parser error if `data` is not a valid object file.
    pub fn parse(data: &[u8]) -> Result<Self, object::Error> {
        let obj = object::File::parse(data)?;

        // Prefer .symtab, fall back to .dynsym for stripped binaries
        let mut functions: Vec<Symbol> = obj
            .symbols()
            .chain(obj.dynamic_symbols())
            .filter(|sym| {
                sym.kind() == SymbolKind::Text && sym.is_definition() && sym.size() > 0
            })
            .filter_map(|sym| {
                let name = demangle_symbol(sym.name().ok()?);
                Some(Symbol::new(sym.address(), sym.size(), name))
            })
            .collect();
        functions.sort_by_key(|sym| sym.addr);
        functions.dedup_by_key(|sym| sym.addr);

        let plt_section = obj.section_by_name(".plt");
        if let Some(section) = &plt_section {
            functions.push(Symbol::new(
                section.address(),
                section.size(),
                PLT_AGGREGATE,
            ));
        }

        let plt = match &plt_section {
            Some(section) if obj.architecture() == Architecture::Aarch64 => {
                Some(aarch64_plt_stubs(&obj, section.address(), section.size()))
            }
            _ => None,
        };

        let build_id = obj
            .build_id()
            .ok()
            .flatten()
            .map(|id| id.iter().map(|b| format!("{b:02x}")).collect());

        debug!(
            "Read {} function symbols{}",
            functions.len(),
            if plt.is_some() { " and PLT stubs" } else { "" }
        );
        Ok(Self {
            functions,
            plt,
            build_id,
        })
    }
}

/// Name the PLT stubs after their jump-slot relocations, in order
fn aarch64_plt_stubs(obj: &object::File<'_>, plt_addr: u64, plt_size: u64) -> Vec<Symbol> {
    let Some(relocations) = obj.dynamic_relocations() else {
        return Vec::new();
    };
    let Some(dynsym) = obj.dynamic_symbol_table() else {
        return Vec::new();
    };

    relocations
        .filter(|(_, reloc)| match reloc.flags() {
            RelocationFlags::Elf { r_type } => r_type == object::elf::R_AARCH64_JUMP_SLOT,
            _ => false,
        })
        .filter_map(|(_, reloc)| match reloc.target() {
            RelocationTarget::Symbol(index) => dynsym.symbol_by_index(index).ok(),
            _ => None,
        })
        .enumerate()
        .filter_map(|(i, sym)| {
            let addr = aarch64_plt_stub(plt_addr, plt_size, i)?;
            let name = format!("{}@plt", demangle_symbol(sym.name().ok()?));
            Some(Symbol::new(addr, AARCH64_PLT_ENTRY, name))
        })
        .collect()
}

/// Address of stub `index`, if it lies inside the section
///
/// The section bounds come straight from the file, so a malformed binary
/// yields `None` instead of an overflow.
fn aarch64_plt_stub(plt_addr: u64, plt_size: u64, index: usize) -> Option<u64> {
    let section_end = plt_addr.checked_add(plt_size)?;
    let addr = u64::try_from(index)
        .ok()?
        .checked_mul(AARCH64_PLT_ENTRY)?
        .checked_add(AARCH64_PLT_HEADER)?
        .checked_add(plt_addr)?;
    (addr.checked_add(AARCH64_PLT_ENTRY)? <= section_end).then_some(addr)
}

/// Demangle a Rust symbol name without the hash suffix, other names pass through
#[must_use]
pub fn demangle_symbol(symbol: &str) -> String {
    format!("{:#}", demangle(symbol))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demangle_rust_symbol() {
        assert_eq!(
            demangle_symbol("_ZN4core3fmt5write17h0123456789abcdefE"),
            "core::fmt::write"
        );
    }

    #[test]
    fn test_plain_symbol_is_unchanged() {
        assert_eq!(demangle_symbol("malloc"), "malloc");
    }

    #[test]
    fn test_plt_stub_layout() {
        assert_eq!(aarch64_plt_stub(0x1000, 0x60, 0), Some(0x1020));
        assert_eq!(aarch64_plt_stub(0x1000, 0x60, 3), Some(0x1050));
        assert_eq!(aarch64_plt_stub(0x1000, 0x60, 4), None);
    }

    #[test]
    fn test_plt_stub_bounds_do_not_overflow() {
        assert_eq!(aarch64_plt_stub(u64::MAX - 8, 0x60, 0), None);
        assert_eq!(aarch64_plt_stub(0x1000, u64::MAX, 0), None);
        assert_eq!(aarch64_plt_stub(0x1000, 0x60, usize::MAX), None);
    }

    #[test]
    fn test_garbage_is_not_an_object() {
        assert!(ElfSymbols::parse(b"definitely not an ELF file").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = ElfSymbols::load("/nonexistent/libfoo.so").unwrap_err();
        assert!(matches!(err, ResolveError::Read { .. }));
    }
}
