pub mod clean;
pub mod convert;
pub mod status;
pub mod watch;
pub mod worker;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use bibmd_convert::{ConvertOptions, RunSummary, SubprocessExecutor, default_output_root};
use bibmd_core::ProgressContext;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use crate::config::Config;

/// Log flags forwarded to worker subprocesses.
#[derive(Debug, Clone, Copy)]
pub struct WorkerFlags {
    pub quiet: bool,
    pub debug: bool,
}

impl WorkerFlags {
    /// This binary's hidden `worker` subcommand as the executor.
    pub fn executor(self) -> Result<SubprocessExecutor> {
        let mut exec =
            SubprocessExecutor::current_exe_worker().context("Cannot locate bibmd executable")?;
        if self.debug {
            exec = exec.arg("--debug");
        } else if self.quiet {
            exec = exec.arg("--quiet");
        }
        Ok(exec)
    }
}

/// Run options for `bib`, with config defaults and CLI overrides applied.
pub fn options(
    bib: &Path,
    output: Option<PathBuf>,
    processes: Option<usize>,
    config: &Config,
) -> Result<ConvertOptions> {
    let bib = std::path::absolute(bib)
        .with_context(|| format!("Invalid bibliography path: {}", bib.display()))?;
    let mut opts = ConvertOptions::new(&bib);
    opts.output_root = match output {
        Some(dir) => std::path::absolute(&dir)
            .with_context(|| format!("Invalid output path: {}", dir.display()))?,
        None => std::env::current_dir()
            .context("Cannot determine current directory")?
            .join(default_output_root(&bib, &config.output.suffix)),
    };
    opts.workers = config.workers.resolve(processes);
    opts.pdf_command = config.extract.pdf_command.clone();
    Ok(opts)
}

/// 130 when interrupted, 1 when any entry failed.
fn exit_status(summary: &RunSummary) -> u8 {
    if summary.interrupted {
        130
    } else if summary.failed > 0 {
        1
    } else {
        0
    }
}

pub fn exit_code(summary: &RunSummary) -> ExitCode {
    ExitCode::from(exit_status(summary))
}

/// Summary table for interactive runs.
pub fn print_summary(summary: &RunSummary, progress: &ProgressContext) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Entries").fg(Color::Cyan),
            Cell::new("Count").fg(Color::Cyan),
        ]);

    table.add_row(vec!["Discovered".to_string(), summary.total.to_string()]);
    table.add_row(vec!["Up to date".to_string(), summary.up_to_date.to_string()]);
    table.add_row(vec!["Skipped (invalid key)".to_string(), summary.invalid.to_string()]);
    table.add_row(vec!["Stale".to_string(), summary.planned.to_string()]);
    table.add_row(vec![
        Cell::new("Processed"),
        Cell::new(summary.processed).fg(Color::Green),
    ]);
    let failed_color = if summary.failed > 0 { Color::Red } else { Color::Reset };
    table.add_row(vec![
        Cell::new("Failed"),
        Cell::new(summary.failed).fg(failed_color),
    ]);
    table.add_row(vec![
        "Elapsed".to_string(),
        format!("{:.1}s", summary.elapsed.as_secs_f64()),
    ]);
    progress.println(format!("\n{table}"));

    for (key, error) in &summary.failures {
        progress.println(format!("  failed {key}: {error}"));
    }
    if summary.interrupted {
        progress.println("  interrupted; remaining entries stay stale");
    }
}
