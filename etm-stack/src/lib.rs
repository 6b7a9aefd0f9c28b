//! # etm-stack - Call Stack Reconstruction from ETM Traces
//!
//! etm-stack turns a stream of decoded ARM ETM trace elements (instruction
//! ranges, exceptions, timestamps, context switches) into balanced call/return
//! duration events per thread, ready for a timeline viewer.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Element Source (decoder, replay)                │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ (trace-ID, TraceElement)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          etm-stack                              │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │   Context    │──▶│    Tracer    │──▶│   Stacker    │         │
//! │  │   Tracker    │   │  (per lane)  │   │ (per thread) │         │
//! │  └──────────────┘   └──────┬───────┘   └──────┬───────┘         │
//! │                            │                  │ events          │
//! │                            ▼                  ▼                 │
//! │                    ┌──────────────┐   ┌──────────────┐          │
//! │                    │ SymbolCache  │   │ TraceWriter  │          │
//! │                    │  + Resolver  │   │ (trace.json) │          │
//! │                    └──────────────┘   └──────────────┘          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`stacker`]: the per-thread state machine. Classifies instruction ranges
//!   into calls, returns and tail calls, handles exceptions, PLT stubs and
//!   trace gaps, and defers events until their timestamps are known.
//! - [`tracer`]: the session driver. Tracks lanes and threads, resolves
//!   addresses to symbols and feeds the stackers.
//! - [`context`]: folds context-change elements into (thread, process,
//!   exception level).
//! - [`resolver`]: address resolver and thread registry contracts, and the
//!   manifest-backed implementation.
//! - [`symbolization`]: per-binary symbol tables with PLT stub expansion and
//!   ELF symbol loading.
//! - [`export`]: trace writer contract and the Chrome Trace Event writer.
//! - [`input`]: JSON-lines element streams.
//! - [`config`], [`cli`]: session and command-line configuration.
//! - [`domain`]: newtypes and error types.
//!
//! ## Heuristics
//!
//! ETM only reports where execution went, not why. The stacker guesses:
//!
//! - a branch-with-link starts a call, a `RET` ends one
//! - a symbol change without either is a tail call
//! - returning below the known stack means the caller has been running since
//!   the first known timestamp
//! - gaps after PLT stubs and inside exception handlers are expected
//!
//! When a guess turns out wrong the stack is dropped (every open frame is
//! closed) and reconstruction starts over.
//!
//! ## Typical Usage
//!
//! ```bash
//! # Replay a decoded trace against a recording manifest
//! etm-stack elements.jsonl -m manifest.json -b binary_cache -o trace.json
//!
//! # Open trace.json in Perfetto or chrome://tracing
//! ```

pub mod cli;
pub mod config;
pub mod context;
pub mod domain;
pub mod export;
pub mod input;
pub mod resolver;
pub mod stacker;
pub mod symbolization;
pub mod tracer;
