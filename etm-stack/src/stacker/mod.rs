//! # Stack Reconstruction
//!
//! A [`Stacker`] follows how one logical thread's call stack evolves while the
//! tracer feeds it symbol-level observations, and turns that into an ordered
//! stream of call/return [`Event`]s.
//!
//! ## Deferred timestamps
//!
//! ETM only emits timestamps every so often, so most observations arrive
//! without one. Events created without a timestamp are queued and also kept on
//! a waiting list; the next known timestamp resolves all of them at once.
//! Events are only handed out on [`flush`](Stacker::flush), which happens
//! whenever the stack is lost and at the end of the session.
//!
//! ## Heuristics
//!
//! Trace data is lossy and the instruction stream only tells us about branch
//! kinds, so the stacker guesses:
//!
//! - a symbol change without a call or return is a tail call
//! - returning below the known stack means the new function has been running
//!   since the first known timestamp (its call is inserted at the front)
//! - gaps right after a PLT stub or inside an exception handler are expected
//!   and do not drop the stack; any other gap does
//! - an exception that returns somewhere unexpected drops the stack
//!
//! What the stacker never does is repair a return from a function that is not
//! on top of the stack: that is reported as [`StackError::Mismatch`].

mod event;
mod op;

pub use event::{Event, EventKind};
pub use op::{RangeStep, StackOp};

use log::debug;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::config::Heuristics;
use crate::domain::{StackError, Timestamp};
use event::Pending;

/// An entry of the reconstructed call stack
#[derive(Debug, Clone, PartialEq, Eq)]
struct Frame {
    name: String,
    exception: bool,
}

/// Call stack reconstruction state for one logical thread
#[derive(Debug)]
pub struct Stacker {
    heuristics: Rc<Heuristics>,

    stack: Vec<Frame>,
    events: VecDeque<Rc<Pending>>,
    /// Returns that must be written before `events` because a call was
    /// inserted in front of them
    early_events: Vec<Rc<Pending>>,
    /// Queued events whose timestamp is not known yet
    waiting: Vec<Rc<Pending>>,
    /// Flushed events not yet picked up by the driver
    emitted: Vec<Event>,

    was_call: bool,
    was_ret: bool,
    was_plt: bool,
    last_symbol: Option<String>,
    exception_name: Option<String>,
    excepted_return: Option<u64>,
    first_timestamp: Option<Timestamp>,
    last_timestamp: Option<Timestamp>,
}

impl Default for Stacker {
    fn default() -> Self {
        Self::new()
    }
}

impl Stacker {
    #[must_use]
    pub fn new() -> Self {
        Self::with_heuristics(Rc::new(Heuristics::default()))
    }

    #[must_use]
    pub fn with_heuristics(heuristics: Rc<Heuristics>) -> Self {
        Self {
            heuristics,
            stack: Vec::new(),
            events: VecDeque::new(),
            early_events: Vec::new(),
            waiting: Vec::new(),
            emitted: Vec::new(),
            was_call: false,
            was_ret: false,
            was_plt: false,
            last_symbol: None,
            exception_name: None,
            excepted_return: None,
            first_timestamp: None,
            last_timestamp: None,
        }
    }

    /// Clear the transient state
    ///
    /// The stack and the queues are left alone; `lost_stack` empties those
    /// before resetting.
    fn reset(&mut self) {
        self.was_call = false;
        self.was_ret = false;
        self.was_plt = false;
        self.last_symbol = None;
        self.exception_name = None;
        self.excepted_return = None;
        self.first_timestamp = None;
        self.last_timestamp = None;
    }

    // ── Accessors ───────────────────────────────────────────────────────

    /// Current stack depth
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Symbols currently on the stack, root first
    pub fn stack(&self) -> impl Iterator<Item = &str> {
        self.stack.iter().map(|f| f.name.as_str())
    }

    #[must_use]
    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.first_timestamp
    }

    #[must_use]
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.last_timestamp
    }

    /// Override the last known timestamp, e.g. to close every thread at the
    /// same time at the end of a session
    pub fn set_last_timestamp(&mut self, timestamp: Option<Timestamp>) {
        self.last_timestamp = timestamp;
    }

    #[must_use]
    pub fn in_exception(&self) -> bool {
        self.exception_name.is_some()
    }

    /// Number of queued events still waiting for a timestamp
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiting.len()
    }

    /// Take the events written by the flushes so far
    pub fn drain_emitted(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.emitted)
    }

    // ── Primitives ──────────────────────────────────────────────────────

    /// Apply one primitive operation
    ///
    /// # Errors
    /// Returns the protocol violation the operation ran into, see
    /// [`StackError`].
    pub fn process(&mut self, op: StackOp<'_>) -> Result<(), StackError> {
        match op {
            StackOp::Call { symbol, timestamp } => self.call(symbol, timestamp, false),
            StackOp::Return { symbol, timestamp } => self.ret(symbol, timestamp),
            StackOp::InstrRange { timestamp, step } => self.instr_range(timestamp, step),
            StackOp::Exception {
                timestamp,
                name,
                excepted_return,
            } => self.exception(timestamp, name, excepted_return),
            StackOp::Gap { timestamp } => self.gap(timestamp),
            StackOp::LostStack { timestamp } => self.lost_stack(timestamp),
            StackOp::Timestamp(timestamp) => {
                self.timestamp(timestamp);
                Ok(())
            }
        }
    }

    /// Push `symbol` and queue its call event
    ///
    /// With `front` set the call is queued before everything already pending.
    /// Returns at the head of the queue are moved to the early events first,
    /// so that no return ends up written after a call it does not belong to.
    ///
    /// # Errors
    /// [`StackError::NestedException`] if an exception frame is still open,
    /// [`StackError::TimestampRegression`] if a front insertion would place the
    /// call after the returns it has to precede.
    pub fn call(
        &mut self,
        symbol: &str,
        timestamp: Option<Timestamp>,
        front: bool,
    ) -> Result<(), StackError> {
        self.push(symbol, timestamp, front, false)
    }

    fn push(
        &mut self,
        symbol: &str,
        timestamp: Option<Timestamp>,
        front: bool,
        exception: bool,
    ) -> Result<(), StackError> {
        if self.stack.iter().any(|f| f.exception) {
            return Err(StackError::NestedException {
                symbol: symbol.to_string(),
                stack: self.stack.iter().map(|f| f.name.clone()).collect(),
            });
        }

        if front && self.events.front().is_some_and(|e| !e.is_call()) {
            let head = self.events.front().and_then(|e| e.timestamp());
            if let (Some(head), Some(current)) = (head, timestamp) {
                if head > current {
                    return Err(StackError::TimestampRegression {
                        previous: head,
                        current,
                    });
                }
            }
            while let Some(event) = self.events.pop_front() {
                if event.is_call() {
                    self.events.push_front(event);
                    break;
                }
                self.early_events.push(event);
            }
        }

        self.stack.push(Frame {
            name: symbol.to_string(),
            exception,
        });
        self.enqueue(EventKind::Call, symbol, timestamp, front);
        Ok(())
    }

    /// Pop `symbol` and queue its return event
    ///
    /// # Errors
    /// [`StackError::Underflow`] on an empty stack, [`StackError::Mismatch`] if
    /// `symbol` is not on top.
    pub fn ret(&mut self, symbol: &str, timestamp: Option<Timestamp>) -> Result<(), StackError> {
        match self.stack.last() {
            None => return Err(StackError::Underflow(symbol.to_string())),
            Some(top) if top.name != symbol => {
                return Err(StackError::Mismatch {
                    symbol: symbol.to_string(),
                    top: top.name.clone(),
                });
            }
            Some(_) => {}
        }
        self.stack.pop();
        self.enqueue(EventKind::Return, symbol, timestamp, false);
        Ok(())
    }

    fn enqueue(
        &mut self,
        kind: EventKind,
        symbol: &str,
        timestamp: Option<Timestamp>,
        front: bool,
    ) {
        let event = Pending::new(kind, symbol.to_string(), timestamp);
        if timestamp.is_none() {
            self.waiting.push(Rc::clone(&event));
        }
        if front {
            self.events.push_front(event);
        } else {
            self.events.push_back(event);
        }
    }

    /// Resolve the waiting events, if `timestamp` is known
    fn check_waiting(&mut self, timestamp: Option<Timestamp>) {
        let Some(timestamp) = timestamp else {
            return;
        };

        if self.first_timestamp.is_none() {
            self.first_timestamp = Some(timestamp);
        }
        self.last_timestamp = Some(timestamp);

        for event in self.waiting.drain(..) {
            event.resolve(timestamp);
        }
    }

    /// A new timestamp is known
    pub fn timestamp(&mut self, timestamp: Timestamp) {
        self.check_waiting(Some(timestamp));
    }

    /// Write the queued events whose timestamps are known
    ///
    /// Early events go first, then the pending queue. Events still waiting for
    /// a timestamp stay queued and are written by a later flush. Open frames
    /// are not closed; that is what [`lost_stack`](Self::lost_stack) is for.
    ///
    /// # Errors
    /// [`StackError::TimestampRegression`] if the written events would not be
    /// in timestamp order. Nothing is written in that case.
    pub fn flush(&mut self) -> Result<(), StackError> {
        let mut last: Option<Timestamp> = None;
        for event in self.early_events.iter().chain(self.events.iter()) {
            if let Some(current) = event.timestamp() {
                if let Some(previous) = last.filter(|previous| *previous > current) {
                    return Err(StackError::TimestampRegression { previous, current });
                }
                last = Some(current);
            }
        }

        self.emitted.extend(
            self.early_events
                .iter()
                .chain(self.events.iter())
                .filter_map(|e| e.to_event()),
        );
        self.early_events.clear();
        self.events.clear();
        self.events.extend(self.waiting.iter().cloned());
        Ok(())
    }

    /// Give up on the current stack
    ///
    /// Every open frame is closed at `timestamp`, innermost first, everything
    /// is flushed and the stacker starts over from an empty stack.
    ///
    /// # Errors
    /// Whatever [`flush`](Self::flush) reports.
    pub fn lost_stack(&mut self, timestamp: Option<Timestamp>) -> Result<(), StackError> {
        self.check_waiting(timestamp);

        if !self.stack.is_empty() {
            debug!(
                "Lost stack at {timestamp:?}, closing {} frames",
                self.stack.len()
            );
        }
        while let Some(frame) = self.stack.pop() {
            self.enqueue(EventKind::Return, &frame.name, timestamp, false);
        }
        self.flush()?;
        self.reset();
        Ok(())
    }

    /// The trace has a gap
    ///
    /// Gaps are expected while an exception handler runs and right after a PLT
    /// stub, so those keep the stack. Any other gap loses it.
    ///
    /// # Errors
    /// Whatever [`lost_stack`](Self::lost_stack) reports.
    pub fn gap(&mut self, timestamp: Option<Timestamp>) -> Result<(), StackError> {
        self.last_timestamp = None;
        if self.exception_name.is_some() {
            return Ok(());
        }

        if self
            .last_symbol
            .as_deref()
            .is_some_and(|s| self.heuristics.is_plt(s))
        {
            self.was_plt = true;
            return Ok(());
        }

        self.lost_stack(timestamp)
    }

    /// An exception was taken
    ///
    /// If another exception is still open it is closed first when it was
    /// going to return to the same place; otherwise trace was lost in between
    /// and the stack is dropped.
    ///
    /// # Errors
    /// Any [`StackError`] from closing the previous exception or opening the
    /// new one.
    pub fn exception(
        &mut self,
        timestamp: Option<Timestamp>,
        name: &str,
        excepted_return: Option<u64>,
    ) -> Result<(), StackError> {
        self.check_waiting(timestamp);

        if let Some(open) = self.exception_name.clone() {
            if excepted_return.is_some() && self.excepted_return == excepted_return {
                self.ret(&open, timestamp)?;
            } else {
                debug!(
                    "Exception {name} interrupted {open} with another return, dropping the stack"
                );
                self.lost_stack(timestamp)?;
            }
        }

        self.exception_name = Some(name.to_string());
        self.excepted_return = excepted_return;
        self.push(name, timestamp, false, true)?;
        // lost_stack above resets the timestamps
        if self.first_timestamp.is_none() {
            self.first_timestamp = timestamp;
        }
        if timestamp.is_some() {
            self.last_timestamp = timestamp;
        }
        Ok(())
    }

    /// Classify one executed instruction range
    ///
    /// # Errors
    /// Any [`StackError`] raised by the implied calls and returns.
    pub fn instr_range(
        &mut self,
        timestamp: Option<Timestamp>,
        step: RangeStep<'_>,
    ) -> Result<(), StackError> {
        let RangeStep {
            start,
            start_addr,
            end,
            subtype,
            ..
        } = step;
        self.check_waiting(timestamp);

        if let Some(name) = self.exception_name.take() {
            self.ret(&name, timestamp)?;
            let excepted = self.excepted_return.take();
            // Returning elsewhere is fine as long as we are still in the
            // function the exception interrupted.
            let returned = excepted.is_none_or(|addr| addr == start_addr);
            if !returned && self.stack.last().is_none_or(|top| top.name != start) {
                debug!(
                    "Exception did not return to {excepted:?} but to {start} at {start_addr:#x}"
                );
                self.lost_stack(self.last_timestamp)?;
            }
        }

        if std::mem::take(&mut self.was_plt) {
            let depth = self.stack.len();
            let returns_to_caller = depth > 1 && self.stack[depth - 2].name == start;
            match self.last_symbol.clone() {
                Some(stub) if returns_to_caller => {
                    self.ret(&stub, timestamp)?;
                    self.last_symbol = Some(start.to_string());
                }
                _ => {
                    debug!("PLT stub did not return to its caller but to {start}");
                    self.lost_stack(timestamp)?;
                }
            }
        }

        if self
            .last_symbol
            .as_deref()
            .is_some_and(|last| last != start && self.heuristics.is_rewinding(last))
        {
            self.lost_stack(timestamp)?;
        }

        // lost_stack above resets the timestamps
        if self.first_timestamp.is_none() {
            self.first_timestamp = timestamp;
        }
        if timestamp.is_some() {
            self.last_timestamp = timestamp;
        }

        if !self.was_call && !self.was_ret && self.last_symbol.as_deref() != Some(start) {
            // Without a previous symbol this is the start of a new
            // reconstruction rather than a tail call.
            if let Some(last) = self.last_symbol.clone() {
                self.ret(&last, timestamp)?;
            }
            self.call(start, timestamp, false)?;
        }
        if self.was_ret && self.stack.is_empty() {
            // Returned below the known stack: the function must have been
            // running since the first timestamp we know of.
            self.call(start, self.first_timestamp, true)?;
        }
        if self.was_call {
            self.call(start, timestamp, false)?;
        }
        if start != end {
            self.ret(start, timestamp)?;
            self.call(end, timestamp, false)?;
        }
        if subtype.is_return() {
            self.ret(end, timestamp)?;
        }

        self.was_ret = subtype.is_return();
        self.was_call = subtype.is_call();
        self.last_symbol = Some(end.to_string());
        if timestamp.is_some() {
            self.last_timestamp = timestamp;
        }
        Ok(())
    }
}
