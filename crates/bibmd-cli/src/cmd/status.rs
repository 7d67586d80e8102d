//! `bibmd status` - committed records and their current state (read-only)

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use bibmd_convert::{Converter, PlanStatus, bibtex};
use bibmd_store::{EntryRecord, MemoStore};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use super::WorkerFlags;
use crate::config::Config;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Bibliography file (.bib)
    pub bib: PathBuf,

    /// Output root (default: ./{bib-stem}-{suffix})
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn run(args: StatusArgs, config: &Config, flags: WorkerFlags) -> Result<()> {
    let opts = super::options(&args.bib, args.output, None, config)?;
    let store_path = opts.store_path();
    let Some(store) = MemoStore::open_read_only(&store_path)
        .with_context(|| format!("Failed to open {}", store_path.display()))?
    else {
        log::info!("No store at {}; nothing converted yet", store_path.display());
        return Ok(());
    };
    let records = store.list()?;
    drop(store);

    // Current state per key; the table still prints if the bibliography
    // can't be read
    let converter = Converter::new(opts, flags.executor()?);
    let states: Option<HashMap<String, PlanStatus>> =
        match bibtex::load(&converter.options().bib_file) {
            Ok(entries) => Some(
                converter
                    .plan(entries)?
                    .entries
                    .into_iter()
                    .filter(|p| !matches!(p.status, PlanStatus::Duplicate))
                    .map(|p| (p.entry.key, p.status))
                    .collect(),
            ),
            Err(e) => {
                log::warn!("{e:#}");
                None
            }
        };

    print_records(&records, states.as_ref());

    if let Some(states) = &states {
        let unconverted = states
            .values()
            .filter(|s| **s == PlanStatus::New)
            .count();
        let stale = states.values().filter(|s| s.is_stale()).count();
        eprintln!(
            "{} committed, {stale} stale ({unconverted} never converted)",
            records.len()
        );
    }
    Ok(())
}

fn state_cell(key: &str, states: Option<&HashMap<String, PlanStatus>>) -> Cell {
    let Some(states) = states else {
        return Cell::new("?");
    };
    match states.get(key) {
        Some(PlanStatus::UpToDate) => Cell::new("UP_TO_DATE").fg(Color::Green),
        Some(s) if s.is_stale() => Cell::new(s.label()).fg(Color::Yellow),
        Some(s) => Cell::new(s.label()),
        None => Cell::new("NOT_IN_BIB").fg(Color::DarkGrey),
    }
}

fn print_records(records: &[EntryRecord], states: Option<&HashMap<String, PlanStatus>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Key").fg(Color::Cyan),
            Cell::new("Files").fg(Color::Cyan),
            Cell::new("Workspace").fg(Color::Cyan),
            Cell::new("Last processed").fg(Color::Cyan),
            Cell::new("State").fg(Color::Cyan),
        ]);

    for record in records {
        table.add_row(vec![
            Cell::new(&record.key),
            Cell::new(record.file_hashes.len()),
            Cell::new(record.dir_hash.short()),
            Cell::new(record.last_processed.format("%Y-%m-%d %H:%M:%S UTC")),
            state_cell(&record.key, states),
        ]);
    }

    eprintln!("\n{table}");
}
