//! # etm-stack - Main Entry Point
//!
//! Replays a decoded element stream through the [`Tracer`] and writes the
//! reconstructed call stacks as a Chrome trace. When reconstruction fails the
//! part of the trace reconstructed so far is still written before the error is
//! reported.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

use etm_stack::cli::Args;
use etm_stack::config::{LaneMode, TracerConfig};
use etm_stack::export::ChromeTraceWriter;
use etm_stack::input::ElementReader;
use etm_stack::resolver::Manifest;
use etm_stack::tracer::Tracer;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.to_string().contains("is not a directory") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;

    let mut manifest = Manifest::load(&args.manifest)
        .context("Failed to load manifest")?;
    if let Some(ref dir) = args.binary_cache {
        anyhow::ensure!(
            dir.is_dir(),
            "Binary cache '{}' is not a directory",
            dir.display()
        );
        manifest = manifest.with_binary_cache(dir);
    }

    let config = TracerConfig {
        lane_mode: if args.per_cpu {
            LaneMode::Cpu
        } else {
            LaneMode::Thread
        },
        category: args.category.clone(),
        ..TracerConfig::default()
    };

    let input = File::open(&args.elements)
        .with_context(|| format!("Failed to open {}", args.elements.display()))?;
    let output_path = args.output_path();

    if !quiet {
        println!("etm-stack v{}", env!("CARGO_PKG_VERSION"));
        println!("elements: {}", args.elements.display());
        println!("output: {}", output_path.display());
    }

    let writer = ChromeTraceWriter::new(args.ticks_per_us);
    let mut tracer = Tracer::with_config(manifest, writer, config);

    // On failure the prefix reconstructed so far is still exported
    let mut outcome = Ok(());
    for item in ElementReader::new(BufReader::new(input)) {
        if tracer.is_aborted() {
            break;
        }
        let (trace_id, element) = match item {
            Ok(item) => item,
            Err(e) => {
                outcome = Err(anyhow::Error::from(e));
                break;
            }
        };
        if let Err(e) = tracer.handle(trace_id, &element) {
            outcome = Err(e).context("Trace reconstruction failed");
            break;
        }
    }
    let finished = tracer.finish().context("Failed to close the trace");
    if outcome.is_ok() {
        outcome = finished;
    }

    let stats = tracer.stats();
    let writer = tracer.into_writer();
    let file = File::create(&output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;
    let mut out = BufWriter::new(file);
    writer.export(&mut out).context("Failed to export trace")?;
    out.flush().context("Failed to export trace")?;
    info!(
        "Wrote {} events for {} threads",
        writer.event_count(),
        writer.thread_count()
    );

    if !quiet {
        eprintln!("{stats}");
        println!("saved: {}", output_path.display());
    }

    outcome
}
