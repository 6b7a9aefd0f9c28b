//! # Symbolization
//!
//! Turns `(binary path, offset)` pairs produced by an
//! [`AddressResolver`](crate::resolver::AddressResolver) into function names.
//!
//! ## Symbol tables
//!
//! Tables come from the resolver, one per binary, and are loaded the first
//! time an address in that binary is seen. A symbol covers
//! `[addr, addr + len)`; offsets between symbols resolve to nothing and the
//! tracer substitutes its unknown-symbol name.
//!
//! Kernel addresses are reported under a pseudo path (`[kernel]`) but their
//! symbols live under `[kernel.kallsyms]`.
//!
//! ## PLT stubs
//!
//! Symbol tables usually describe the whole `.plt` section as one `@plt`
//! symbol. The stack reconstruction needs to know *which* stub ran to tell a
//! PLT trampoline from a real function, so when the resolver can name the
//! individual stubs the aggregate is replaced by them:
//!
//! ```text
//! before:  [0x500, 0x540)  @plt
//! after:   [0x520, 0x530)  malloc@plt
//!          [0x530, 0x540)  free@plt
//! ```
//!
//! ## ELF binaries
//!
//! [`ElfSymbols`] reads function symbols (demangled), the `.plt` aggregate,
//! AArch64 PLT stub names and the build id from a binary with the `object`
//! crate.

mod cache;
pub mod elf;

pub use cache::SymbolCache;
pub use elf::{demangle_symbol, ElfSymbols};
