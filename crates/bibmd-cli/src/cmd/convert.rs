//! `bibmd convert` - one incremental run

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use bibmd_convert::Converter;
use bibmd_core::SharedProgress;
use clap::Args;

use super::WorkerFlags;
use crate::config::Config;

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Bibliography file (.bib)
    pub bib: PathBuf,

    /// Output root (default: ./{bib-stem}-{suffix})
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Reprocess every entry, ignoring stored fingerprints
    #[arg(short, long)]
    pub force: bool,

    /// Report what would be processed without writing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Worker processes (default from config)
    #[arg(short, long)]
    pub processes: Option<usize>,
}

pub fn run(
    args: ConvertArgs,
    config: &Config,
    progress: &SharedProgress,
    flags: WorkerFlags,
) -> Result<ExitCode> {
    let mut opts = super::options(&args.bib, args.output, args.processes, config)?;
    opts.force = args.force;
    opts.dry_run = args.dry_run;

    let converter = Converter::new(opts, flags.executor()?).with_progress(progress.clone());
    let summary = converter.run()?;

    if progress.is_tty() && !summary.dry_run {
        super::print_summary(&summary, progress);
    } else {
        summary.log();
    }
    Ok(super::exit_code(&summary))
}
