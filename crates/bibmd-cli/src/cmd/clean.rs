//! `bibmd clean` - remove a bibliography's output root

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Bibliography file (.bib)
    pub bib: PathBuf,

    /// Output root (default: ./{bib-stem}-{suffix})
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Only report what would be removed
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

pub fn run(args: CleanArgs, config: &Config) -> Result<()> {
    let opts = super::options(&args.bib, args.output, None, config)?;
    remove_output_root(&opts.output_root, &opts.bib_file, args.dry_run)
}

fn remove_output_root(root: &Path, bib_file: &Path, dry_run: bool) -> Result<()> {
    if !root.exists() {
        log::info!("Nothing to clean at {}", root.display());
        return Ok(());
    }
    if bib_file.starts_with(root) {
        anyhow::bail!(
            "Refusing to remove {}: it contains the bibliography {}",
            root.display(),
            bib_file.display()
        );
    }
    if dry_run {
        log::info!("Would remove {}", root.display());
        return Ok(());
    }
    std::fs::remove_dir_all(root)
        .with_context(|| format!("Failed to remove {}", root.display()))?;
    log::info!("Removed {}", root.display());
    Ok(())
}
