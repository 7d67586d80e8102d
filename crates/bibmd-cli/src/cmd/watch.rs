//! `bibmd watch` - convert, then re-convert on every change

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use bibmd_convert::Converter;
use bibmd_core::SharedProgress;
use clap::Args;

use super::WorkerFlags;
use crate::config::Config;

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Bibliography file (.bib)
    pub bib: PathBuf,

    /// Output root (default: ./{bib-stem}-{suffix})
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Worker processes (default from config)
    #[arg(short, long)]
    pub processes: Option<usize>,

    /// Quiet period before a change triggers a run (default from config)
    #[arg(long)]
    pub debounce_ms: Option<u64>,
}

pub fn run(
    args: WatchArgs,
    config: &Config,
    progress: &SharedProgress,
    flags: WorkerFlags,
) -> Result<ExitCode> {
    let opts = super::options(&args.bib, args.output, args.processes, config)?;
    let debounce = Duration::from_millis(args.debounce_ms.unwrap_or(config.watch.debounce_ms));

    let converter = Converter::new(opts, flags.executor()?).with_progress(progress.clone());
    bibmd_convert::watch(&converter, debounce)?;

    if bibmd_core::is_shutdown_requested() {
        return Ok(ExitCode::from(130));
    }
    Ok(ExitCode::SUCCESS)
}
