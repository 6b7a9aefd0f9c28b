//! # Shared Data Structures (Element Source ↔ Engine)
//!
//! Defines the typed trace elements produced by an ETM decoder and consumed by
//! the call-stack reconstruction engine. The decoder itself (raw trace bytes to
//! elements) lives elsewhere; this crate only pins down the shape of its output
//! so that live decoders and recorded element streams feed the engine the same
//! way.
//!
//! ## Key Types
//!
//! - [`TraceElement`] - One decoded element, tagged by kind
//! - [`InstrRange`] - A contiguous range of executed instructions
//! - [`ExceptionInfo`] - An exception taken by the traced core
//! - [`PeContext`] - Processing-element context (thread, process, exception level)
//! - [`InstrSubtype`] - Classification of the last instruction of a range
//!
//! With the `serde` feature enabled every type can be (de)serialized, which is
//! how element streams are recorded and replayed.

#![no_std]

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ============================================================================
// Exception Names
// ============================================================================

/// Exception type names for A-profile cores, indexed by exception number
///
/// Numbers past the end of the table are reported as `Unknown`.
pub const EXCEPTION_TYPES: [&str; 16] = [
    "PE Reset",
    "Debug Halt",
    "Call",
    "Trap",
    "System Error",
    "Reserved",
    "Inst Debug",
    "Data Debug",
    "Reserved",
    "Reserved",
    "Alignment",
    "Inst Fault",
    "Data Fault",
    "Reserved",
    "IRQ",
    "FIQ",
];

/// Look up the name of an exception number
#[must_use]
pub fn exception_type(number: u32) -> &'static str {
    usize::try_from(number)
        .ok()
        .and_then(|n| EXCEPTION_TYPES.get(n))
        .copied()
        .unwrap_or("Unknown")
}

// ============================================================================
// Context
// ============================================================================

/// Exception level the traced core executes at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExceptionLevel {
    /// Userspace
    #[default]
    EL0,
    /// Kernel
    EL1,
    /// Hypervisor
    EL2,
    /// Secure monitor
    EL3,
}

impl ExceptionLevel {
    /// Returns true for any level above userspace
    #[must_use]
    pub fn is_privileged(self) -> bool {
        self != ExceptionLevel::EL0
    }
}

/// Processing-element context carried by a context-change element
///
/// Only fields whose `*_valid` flag is set carry information. With the usual
/// Linux configuration the context id holds the thread id and the VMID holds
/// the process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PeContext {
    pub exception_level: ExceptionLevel,
    pub ctxt_id_valid: bool,
    pub context_id: u32,
    pub vmid_valid: bool,
    pub vmid: u32,
}

impl PeContext {
    /// Thread id, if this context carries one
    #[must_use]
    pub fn tid(&self) -> Option<u32> {
        self.ctxt_id_valid.then_some(self.context_id)
    }

    /// Process id, if this context carries one
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.vmid_valid.then_some(self.vmid)
    }
}

// ============================================================================
// Instruction Ranges
// ============================================================================

/// Subtype of the last instruction in an [`InstrRange`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum InstrSubtype {
    /// Plain branch or no branch at all
    #[default]
    None,
    /// Branch that sets the link register (a call)
    BranchWithLink,
    /// `RET`
    ReturnV8,
    /// `ERET`
    ExceptionReturnV8,
    /// A v7 instruction that behaves like a return (e.g. `pop {pc}`)
    ImpliedReturnV7,
}

impl InstrSubtype {
    #[must_use]
    pub fn is_call(self) -> bool {
        self == InstrSubtype::BranchWithLink
    }

    #[must_use]
    pub fn is_return(self) -> bool {
        self == InstrSubtype::ReturnV8
    }
}

/// A range of executed instructions `[st_addr, en_addr)`
///
/// The last instruction of the range starts at `en_addr - last_instr_sz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct InstrRange {
    pub st_addr: u64,
    pub en_addr: u64,
    pub last_instr_sz: u8,
    /// The last instruction was executed (a taken branch, if it is one)
    pub last_instr_exec: bool,
    /// The last instruction was conditional
    pub last_instr_cond: bool,
    pub last_i_subtype: InstrSubtype,
}

impl InstrRange {
    /// Address of the last instruction in the range
    #[must_use]
    pub fn last_instr_addr(&self) -> u64 {
        self.en_addr.wrapping_sub(u64::from(self.last_instr_sz))
    }

    /// An unconditional last instruction must have been executed
    ///
    /// A range violating this means the decoder walked code that does not
    /// match what actually ran, usually because the wrong binary was used.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.last_instr_cond || self.last_instr_exec
    }
}

// ============================================================================
// Exceptions
// ============================================================================

/// An exception taken by the traced core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ExceptionInfo {
    pub number: u32,
    /// Address execution returns to once the exception is handled
    pub en_addr: u64,
    /// `en_addr` is valid
    pub excep_ret_addr: bool,
}

impl ExceptionInfo {
    /// Name of the exception type
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        exception_type(self.number)
    }

    /// The return address, if the trace carried one
    #[must_use]
    pub fn return_address(&self) -> Option<u64> {
        self.excep_ret_addr.then_some(self.en_addr)
    }
}

// ============================================================================
// Elements
// ============================================================================

/// A decoded trace element
///
/// Elements arrive in trace order per trace-ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum TraceElement {
    /// Processing-element context update
    ContextChange(PeContext),
    /// Executed instruction range
    InstrRange(InstrRange),
    /// The decoder could not access memory at `st_addr`
    AddrNacc { st_addr: u64 },
    /// Exception taken
    Exception(ExceptionInfo),
    /// Timestamp for the elements since the previous timestamp
    Timestamp { timestamp: u64 },
    /// Cycle count
    CycleCount { cycles: u32 },
    /// Tracing (re)started
    TraceOn,
    /// Synchronization was lost
    NoSync,
    /// Anything the engine has no use for
    Other,
}

impl TraceElement {
    /// Returns true for elements after which the trace cannot be assumed
    /// continuous
    #[must_use]
    pub fn is_discontinuity(&self) -> bool {
        matches!(self, TraceElement::TraceOn | TraceElement::NoSync)
    }
}
