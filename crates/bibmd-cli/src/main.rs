//! bibmd - incremental markdown conversion of bibliography attachments
//!
//! Converts the files attached to each entry of a BibTeX bibliography into
//! one markdown document per entry, reprocessing only entries whose
//! attachments or output changed since the last run.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use cmd::WorkerFlags;
use config::Config;

#[derive(Parser)]
#[command(name = "bibmd")]
#[command(about = "Incremental markdown conversion of bibliography attachments")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file path (default: ./bibmd.toml or ~/.config/bibmd/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Convert stale entries once
    Convert(cmd::convert::ConvertArgs),
    /// Convert, then re-convert whenever the bibliography changes
    Watch(cmd::watch::WatchArgs),
    /// Remove the output directory of a bibliography
    Clean(cmd::clean::CleanArgs),
    /// Show committed entries and whether they are stale
    Status(cmd::status::StatusArgs),
    /// Show current configuration
    Config,
    /// Convert one work unit read from stdin (used internally)
    #[command(hide = true)]
    Worker,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Workers log plain lines to the inherited stderr and keep the
    // default signal disposition
    if let Command::Worker = cli.command {
        let _ = bibmd_core::init_logging(cli.quiet, cli.debug, None);
        cmd::worker::run()?;
        return Ok(ExitCode::SUCCESS);
    }

    let progress = Arc::new(bibmd_core::ProgressContext::new());
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    if let Err(e) = bibmd_core::init_logging(cli.quiet, cli.debug, multi) {
        eprintln!("Failed to initialize logging: {e}");
    }
    bibmd_core::install_signal_handlers().context("Failed to install signal handlers")?;

    let config = if let Some(path) = &cli.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };

    // Worker lines would tear the progress bar, so interactive runs only
    // let warnings through
    let flags = WorkerFlags {
        quiet: cli.quiet || (is_tty && !cli.debug),
        debug: cli.debug,
    };

    match cli.command {
        Command::Convert(args) => cmd::convert::run(args, &config, &progress, flags),
        Command::Watch(args) => cmd::watch::run(args, &config, &progress, flags),
        Command::Clean(args) => cmd::clean::run(args, &config).map(|()| ExitCode::SUCCESS),
        Command::Status(args) => cmd::status::run(args, &config, flags).map(|()| ExitCode::SUCCESS),
        Command::Config => {
            print_config(&config);
            Ok(ExitCode::SUCCESS)
        }
        Command::Worker => unreachable!("worker runs before interactive setup"),
    }
}

fn print_config(config: &Config) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec![
        "Config file",
        &config
            .source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "defaults".to_string()),
    ]);
    table.add_row(vec![
        "Output root",
        &format!("./{{bib-stem}}-{}", config.output.suffix),
    ]);
    table.add_row(vec![
        "Workers",
        &format!("{} (max: {})", config.workers.default, config.workers.max),
    ]);
    table.add_row(vec!["PDF command", &config.extract.pdf_command.join(" ")]);
    table.add_row(vec![
        "Watch debounce",
        &format!("{}ms", config.watch.debounce_ms),
    ]);

    eprintln!("\n{table}");
}
