//! CLI argument definitions

use clap::Parser;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "etm-stack",
    about = "Reconstruct call stacks from decoded ETM trace elements",
    after_help = "\
EXAMPLES:
    etm-stack elements.jsonl -m manifest.json                 Write elements.jsonl.json
    etm-stack elements.jsonl -m manifest.json -b binary_cache Read symbols from binaries
    etm-stack elements.jsonl -m manifest.json --per-cpu       One track per trace-ID"
)]
pub struct Args {
    /// Decoded trace elements, one JSON object per line
    #[arg(value_name = "ELEMENTS")]
    pub elements: PathBuf,

    /// Recording manifest with memory maps, symbols and threads
    #[arg(short, long, value_name = "FILE")]
    pub manifest: PathBuf,

    /// Directory with copies of the traced binaries
    #[arg(short, long, value_name = "DIR")]
    pub binary_cache: Option<PathBuf>,

    /// Output path for the trace (default: ELEMENTS with .json appended)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Reconstruct one stack per trace-ID instead of per thread
    #[arg(long)]
    pub per_cpu: bool,

    /// Timestamp ticks per microsecond
    #[arg(long, default_value = "1.0", value_parser = parse_scale)]
    pub ticks_per_us: f64,

    /// Category attached to every event
    #[arg(long)]
    pub category: Option<String>,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Where the trace is written
    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| default_output(&self.elements))
    }
}

fn default_output(elements: &Path) -> PathBuf {
    let mut name = elements.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

fn parse_scale(s: &str) -> Result<f64, String> {
    let scale: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if scale.is_finite() && scale > 0.0 {
        Ok(scale)
    } else {
        Err("must be a positive number".to_string())
    }
}
