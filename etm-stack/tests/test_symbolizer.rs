#![cfg(target_os = "linux")]

use etm_stack::resolver::{AddressResolver, Manifest};
use etm_stack::symbolization::{ElfSymbols, SymbolCache};

#[test]
fn test_load_own_binary() {
    let binary_path = env!("CARGO_BIN_EXE_etm-stack");
    let symbols = ElfSymbols::load(binary_path).expect("Failed to read symbols");

    assert!(!symbols.functions.is_empty());
    assert!(
        symbols
            .functions
            .iter()
            .any(|sym| sym.name == "main" || sym.name.ends_with("::main")),
        "no main among {} symbols",
        symbols.functions.len()
    );
    assert!(symbols
        .functions
        .iter()
        .any(|sym| sym.name.starts_with("etm_stack::")));
}

#[test]
fn test_symbols_are_sorted() {
    let binary_path = env!("CARGO_BIN_EXE_etm-stack");
    let symbols = ElfSymbols::load(binary_path).expect("Failed to read symbols");
    let plain: Vec<_> = symbols
        .functions
        .iter()
        .filter(|sym| !sym.name.ends_with("@plt"))
        .collect();
    assert!(plain.windows(2).all(|w| w[0].addr < w[1].addr));
}

#[test]
fn test_binary_cache_resolves_own_functions() {
    let binary_path = env!("CARGO_BIN_EXE_etm-stack");
    let elf = ElfSymbols::load(binary_path).expect("Failed to read symbols");
    let main = elf
        .functions
        .iter()
        .find(|sym| sym.name == "main")
        .expect("binary has a main symbol");

    // The cache root is "/", so the binary is found at its own path
    let manifest = Manifest::from_json(&format!(
        r#"{{ "maps": [ {{ "start": 0, "end": 18446744073709551615, "path": "{binary_path}" }} ] }}"#
    ))
    .unwrap()
    .with_binary_cache("/");

    let symbols = manifest
        .symbols(binary_path)
        .expect("binary cache lookup failed");
    assert_eq!(symbols.len(), elf.functions.len());

    let mut cache = SymbolCache::new("[kernel]", "[kernel.kallsyms]");
    assert_eq!(
        cache.symbol_at(&manifest, binary_path, main.addr).as_deref(),
        Some("main")
    );
    assert_eq!(manifest.build_id(binary_path), elf.build_id);
}
