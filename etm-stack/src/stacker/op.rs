//! Primitive stacker operations as data

use etm_stack_common::InstrSubtype;

use crate::domain::Timestamp;

/// One executed instruction range, already mapped to symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeStep<'a> {
    pub start: &'a str,
    pub start_addr: u64,
    pub end: &'a str,
    pub end_addr: u64,
    /// Subtype of the last instruction of the range
    pub subtype: InstrSubtype,
}

impl<'a> RangeStep<'a> {
    #[must_use]
    pub fn new(
        start: &'a str,
        start_addr: u64,
        end: &'a str,
        end_addr: u64,
        subtype: InstrSubtype,
    ) -> Self {
        Self {
            start,
            start_addr,
            end,
            end_addr,
            subtype,
        }
    }
}

/// Tagged form of the stacker primitives, see [`Stacker::process`]
///
/// [`Stacker::process`]: super::Stacker::process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOp<'a> {
    Call {
        symbol: &'a str,
        timestamp: Option<Timestamp>,
    },
    Return {
        symbol: &'a str,
        timestamp: Option<Timestamp>,
    },
    InstrRange {
        timestamp: Option<Timestamp>,
        step: RangeStep<'a>,
    },
    Exception {
        timestamp: Option<Timestamp>,
        name: &'a str,
        excepted_return: Option<u64>,
    },
    Gap { timestamp: Option<Timestamp> },
    LostStack { timestamp: Option<Timestamp> },
    Timestamp(Timestamp),
}
