//! # Session Driver
//!
//! [`Tracer`] consumes decoded trace elements one at a time, resolves the
//! addresses of instruction ranges to symbols and turns every element into the
//! matching [`Stacker`] primitive. Finished events are handed to the
//! [`TraceWriter`] as soon as a stacker flushes them.
//!
//! ## Lanes
//!
//! Each trace-ID (one per traced CPU) is a lane with its own context tracker,
//! timestamp and lost-decoding state. In [`LaneMode::Thread`] a lane forwards
//! elements to the stacker of whichever thread its last context change
//! selected; stackers are keyed by thread id and live for the whole session.
//! In [`LaneMode::Cpu`] every lane has exactly one stacker.
//!
//! ```text
//!  element(trace-ID) ──▶ Lane ──context──▶ thread id ──▶ Stacker ──▶ TraceWriter
//!                         │                                ▲
//!                         └── ranges ──▶ SymbolCache ──────┘
//! ```
//!
//! ## Failure
//!
//! A [`TraceError`] aborts the session: every stacker closes its open frames
//! at its own last timestamp and flushes, so the prefix reconstructed so far
//! still reaches the writer, and the error is returned. Later elements are
//! ignored. The same close-out happens when the abort flag obtained from
//! [`Tracer::cancel_handle`] is raised from outside.

mod stats;

pub use stats::TracerStats;

use etm_stack_common::{ExceptionInfo, InstrRange, PeContext, TraceElement};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{LaneMode, TracerConfig};
use crate::context::ContextTracker;
use crate::domain::{ExportError, Pid, StackError, Tid, Timestamp, TraceError, TraceId};
use crate::export::{ThreadHandle, TraceWriter};
use crate::resolver::{AddressResolver, ThreadInfo, ThreadRegistry};
use crate::stacker::{RangeStep, Stacker};
use crate::symbolization::SymbolCache;

const UNKNOWN_PROCESS: &str = "Unknown process";

/// Process name used for the lanes in [`LaneMode::Cpu`]
const CPU_LANES_PROCESS: &str = "ETM trace";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum StackKey {
    Thread(Tid),
    Lane(TraceId),
}

#[derive(Debug, Default)]
struct Lane {
    context: ContextTracker,
    last_timestamp: Option<Timestamp>,
    /// Inside a run of undecodable addresses
    lost_decoding: bool,
    current: Option<StackKey>,
}

impl Lane {
    /// Forget what the trace told us so far; the selected stacker stays
    fn reset(&mut self) {
        self.context.reset();
        self.lost_decoding = false;
        self.last_timestamp = None;
    }
}

#[derive(Debug)]
struct ThreadStack {
    stacker: Stacker,
    handle: ThreadHandle,
}

/// Reconstruction session over one recording
pub struct Tracer<R, W> {
    config: TracerConfig,
    resolver: R,
    writer: W,
    symbols: SymbolCache,
    lanes: HashMap<TraceId, Lane>,
    stacks: BTreeMap<StackKey, ThreadStack>,
    /// Process names by pid, computed on first sight
    processes: HashMap<Pid, String>,
    abort: Arc<AtomicBool>,
    closed: bool,
    stats: TracerStats,
}

impl<R, W> Tracer<R, W>
where
    R: AddressResolver + ThreadRegistry,
    W: TraceWriter,
{
    pub fn new(resolver: R, writer: W) -> Self {
        Self::with_config(resolver, writer, TracerConfig::default())
    }

    pub fn with_config(resolver: R, writer: W, config: TracerConfig) -> Self {
        Self {
            symbols: SymbolCache::from_config(&config),
            config,
            resolver,
            writer,
            lanes: HashMap::new(),
            stacks: BTreeMap::new(),
            processes: HashMap::new(),
            abort: Arc::new(AtomicBool::new(false)),
            closed: false,
            stats: TracerStats::default(),
        }
    }

    /// Flag that stops the session when set; checked before every element
    #[must_use]
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stats(&self) -> TracerStats {
        self.stats
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn into_writer(self) -> W {
        self.writer
    }

    /// Process one element traced on `trace_id`
    ///
    /// # Errors
    /// Returns the error that aborted the session. Everything reconstructed
    /// up to that point has already been written.
    pub fn handle(&mut self, trace_id: TraceId, element: &TraceElement) -> Result<(), TraceError> {
        if self.is_aborted() {
            if !self.closed {
                info!("Trace reconstruction cancelled");
                self.close_out();
            }
            return Ok(());
        }

        self.stats.elements += 1;
        if let Err(e) = self.process(trace_id, element) {
            self.abort.store(true, Ordering::SeqCst);
            warn!("Aborting trace reconstruction on {trace_id}: {e}");
            self.close_out();
            return Err(e);
        }
        Ok(())
    }

    /// End of the recording
    ///
    /// Every stacker is closed at the latest timestamp seen by any of them,
    /// so that all threads end together.
    ///
    /// # Errors
    /// Returns the first error raised while closing or writing.
    pub fn finish(&mut self) -> Result<(), TraceError> {
        let last = self
            .stacks
            .values()
            .filter_map(|stack| stack.stacker.last_timestamp())
            .max();
        let category = self.config.category.as_deref();
        for stack in self.stacks.values_mut() {
            stack.stacker.set_last_timestamp(last);
            stack.stacker.lost_stack(last)?;
            drain(&mut self.writer, &mut self.stats, category, stack)?;
        }
        info!("Trace finished at {last:?}: {}", self.stats);
        Ok(())
    }

    /// Best-effort flush of every stacker at its own last timestamp
    fn close_out(&mut self) {
        self.closed = true;
        let category = self.config.category.as_deref();
        for (key, stack) in &mut self.stacks {
            let at = stack.stacker.last_timestamp();
            let result = stack
                .stacker
                .lost_stack(at)
                .map_err(TraceError::from)
                .and_then(|()| {
                    drain(&mut self.writer, &mut self.stats, category, stack)
                        .map_err(TraceError::from)
                });
            if let Err(e) = result {
                warn!("Could not close {key:?}: {e}");
            }
        }
    }

    fn process(&mut self, trace_id: TraceId, element: &TraceElement) -> Result<(), TraceError> {
        if element.is_discontinuity() {
            self.stats.gaps += 1;
            if self.current_key(trace_id)?.is_some() {
                self.on_stack(trace_id, |lane, s| s.gap(lane.last_timestamp))?;
            }
            self.lane(trace_id).reset();
            return Ok(());
        }

        match element {
            TraceElement::ContextChange(context) => self.context_change(trace_id, context),
            TraceElement::Timestamp { timestamp } => {
                let timestamp = Timestamp(*timestamp);
                let lane = self.lane(trace_id);
                if lane.last_timestamp == Some(timestamp) {
                    return Ok(());
                }
                lane.last_timestamp = Some(timestamp);
                if self.current_key(trace_id)?.is_some() {
                    self.on_stack(trace_id, |_, s| {
                        s.timestamp(timestamp);
                        Ok(())
                    })?;
                }
                Ok(())
            }
            TraceElement::AddrNacc { st_addr } => self.lost_decoding(trace_id, *st_addr),
            TraceElement::Exception(exception) => self.exception(trace_id, exception),
            TraceElement::InstrRange(range) => self.instr_range(trace_id, range),
            TraceElement::TraceOn
            | TraceElement::NoSync
            | TraceElement::CycleCount { .. }
            | TraceElement::Other => Ok(()),
        }
    }

    fn lane(&mut self, trace_id: TraceId) -> &mut Lane {
        self.lanes.entry(trace_id).or_default()
    }

    /// Key of the stacker elements on `trace_id` go to, if any
    fn current_key(&mut self, trace_id: TraceId) -> Result<Option<StackKey>, TraceError> {
        match self.config.lane_mode {
            LaneMode::Thread => Ok(self.lanes.get(&trace_id).and_then(|lane| lane.current)),
            LaneMode::Cpu => {
                let key = StackKey::Lane(trace_id);
                if !self.stacks.contains_key(&key) {
                    let thread = format!("Trace-ID {}", trace_id.0);
                    self.add_stack(key, CPU_LANES_PROCESS, &thread)?;
                }
                Ok(Some(key))
            }
        }
    }

    fn add_stack(&mut self, key: StackKey, process: &str, thread: &str) -> Result<(), ExportError> {
        let handle = self.writer.thread(process, thread)?;
        let stacker = Stacker::with_heuristics(Rc::clone(&self.config.heuristics));
        self.stacks.insert(key, ThreadStack { stacker, handle });
        self.stats.threads += 1;
        debug!("New stack for '{thread}' in '{process}'");
        Ok(())
    }

    /// Run `op` on the current stacker of `trace_id` and write what it flushed
    fn on_stack(
        &mut self,
        trace_id: TraceId,
        op: impl FnOnce(&Lane, &mut Stacker) -> Result<(), StackError>,
    ) -> Result<(), TraceError> {
        let key = self.current_key(trace_id)?;
        let lane = &*self.lanes.entry(trace_id).or_default();
        let Some(stack) = key.and_then(|key| self.stacks.get_mut(&key)) else {
            self.stats.orphaned += 1;
            debug!("Ignoring element on {trace_id}: no thread context yet");
            return Ok(());
        };

        op(lane, &mut stack.stacker)?;
        drain(
            &mut self.writer,
            &mut self.stats,
            self.config.category.as_deref(),
            stack,
        )?;
        Ok(())
    }

    fn context_change(&mut self, trace_id: TraceId, context: &PeContext) -> Result<(), TraceError> {
        let lane = self.lanes.entry(trace_id).or_default();
        if !lane.context.update(context) || self.config.lane_mode == LaneMode::Cpu {
            return Ok(());
        }

        let kernel = lane.context.is_kernel();
        let info = match lane.context.tid() {
            Some(tid) => self.resolver.thread(tid).unwrap_or_else(|| ThreadInfo {
                pid: Pid(tid.0),
                tid,
                comm: UNKNOWN_PROCESS.to_string(),
            }),
            None => ThreadInfo {
                pid: Pid::UNKNOWN,
                tid: Tid::UNKNOWN,
                comm: UNKNOWN_PROCESS.to_string(),
            },
        };

        let key = StackKey::Thread(info.tid);
        if !self.stacks.contains_key(&key) {
            let suffix = if kernel { " (kernel)" } else { "" };
            let thread = format!("{} {}{suffix}", info.tid.0, info.comm);
            let process = self.process_name(&info);
            self.add_stack(key, &process, &thread)?;
        }
        self.lane(trace_id).current = Some(key);
        Ok(())
    }

    fn process_name(&mut self, info: &ThreadInfo) -> String {
        if let Some(name) = self.processes.get(&info.pid) {
            return name.clone();
        }

        let comm = if info.pid.0 == info.tid.0 {
            info.comm.clone()
        } else {
            self.resolver
                .thread(Tid(info.pid.0))
                .map_or_else(|| UNKNOWN_PROCESS.to_string(), |parent| parent.comm)
        };
        let name = format!("{} {comm}", info.pid.0);
        self.processes.insert(info.pid, name.clone());
        name
    }

    /// Undecodable code: report once per run and drop the stack
    fn lost_decoding(&mut self, trace_id: TraceId, addr: u64) -> Result<(), TraceError> {
        let lane = self.lane(trace_id);
        if lane.lost_decoding {
            return Ok(());
        }
        lane.lost_decoding = true;
        self.stats.lost_decodes += 1;

        match self.resolver.resolve(trace_id, addr) {
            Some(mapped) => warn!(
                "Lost decoding at {}+{:#x} ({addr:#x}) on {trace_id}",
                mapped.path, mapped.offset
            ),
            None => warn!("Lost decoding at unmapped address {addr:#x} on {trace_id}"),
        }
        self.on_stack(trace_id, |lane, s| s.lost_stack(lane.last_timestamp))
    }

    fn exception(
        &mut self,
        trace_id: TraceId,
        exception: &ExceptionInfo,
    ) -> Result<(), TraceError> {
        self.stats.exceptions += 1;
        let name = format!(
            "Exception: \"{}\" ({})!",
            exception.type_name(),
            exception.number
        );
        let excepted_return = exception.return_address();
        self.on_stack(trace_id, |lane, s| {
            s.exception(lane.last_timestamp, &name, excepted_return)
        })
    }

    fn instr_range(&mut self, trace_id: TraceId, range: &InstrRange) -> Result<(), TraceError> {
        self.stats.instr_ranges += 1;
        if self.current_key(trace_id)?.is_none() {
            self.stats.orphaned += 1;
            debug!("Ignoring range on {trace_id}: no thread context yet");
            return Ok(());
        }

        let end_addr = range.last_instr_addr();
        let Some(start) = self.resolver.resolve(trace_id, range.st_addr) else {
            return self.lost_decoding(trace_id, range.st_addr);
        };
        let Some(end) = self.resolver.resolve(trace_id, end_addr) else {
            return self.lost_decoding(trace_id, end_addr);
        };
        self.lane(trace_id).lost_decoding = false;

        let start_name = self
            .symbols
            .symbol_at(&self.resolver, &start.path, start.offset)
            .unwrap_or_else(|| self.config.unknown_symbol.clone());
        let end_name = self
            .symbols
            .symbol_at(&self.resolver, &end.path, end.offset)
            .unwrap_or_else(|| self.config.unknown_symbol.clone());

        if !range.is_consistent() {
            return Err(TraceError::WrongBinary {
                build_id: self.resolver.build_id(&end.path),
                path: end.path,
                offset: end.offset,
            });
        }

        let step = RangeStep::new(
            &start_name,
            range.st_addr,
            &end_name,
            range.en_addr,
            range.last_i_subtype,
        );
        self.on_stack(trace_id, |lane, s| s.instr_range(lane.last_timestamp, step))
    }
}

fn drain<W: TraceWriter>(
    writer: &mut W,
    stats: &mut TracerStats,
    category: Option<&str>,
    stack: &mut ThreadStack,
) -> Result<(), ExportError> {
    for event in stack.stacker.drain_emitted() {
        writer.duration(
            event.kind.is_call(),
            stack.handle,
            category,
            &event.name,
            event.timestamp,
        )?;
        stats.events += 1;
    }
    Ok(())
}
