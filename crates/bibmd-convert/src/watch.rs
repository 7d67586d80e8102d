//! Re-run the converter whenever the bibliography file changes

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, new_debouncer};

use crate::dispatch::Converter;
use crate::executor::Executor;

/// How often the loop wakes up to check for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Does any of `paths` name the watched file?
fn touches(paths: &[PathBuf], file_name: &OsStr) -> bool {
    paths.iter().any(|p| p.file_name() == Some(file_name))
}

/// Block until at least one trigger arrives, then swallow every trigger
/// already queued so a burst becomes one run. Returns how many were
/// coalesced, or `None` once `cancel` is raised or the sender is gone.
fn wait_for_trigger(rx: &Receiver<()>, cancel: &AtomicBool) -> Option<usize> {
    loop {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(()) => return Some(1 + rx.try_iter().count()),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
}

fn run_logged<X: Executor>(converter: &Converter<X>) {
    match converter.run() {
        Ok(summary) => summary.log(),
        Err(e) => log::error!("Run failed: {e:#}"),
    }
}

/// Run once, then again after every debounced change to the bibliography
/// file, until the converter's cancel flag is raised. Errors from
/// individual runs are logged and watching continues.
pub fn watch<X: Executor>(converter: &Converter<X>, debounce: Duration) -> Result<()> {
    let bib_file = converter.options().bib_file.clone();
    let file_name = bib_file
        .file_name()
        .with_context(|| format!("{} is not a file path", bib_file.display()))?
        .to_os_string();
    let parent = match bib_file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    run_logged(converter);

    let (tx, rx) = mpsc::channel::<()>();
    let watched = file_name.clone();
    let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
        match result {
            Ok(events) => {
                if events.iter().any(|e| touches(&e.event.paths, &watched)) {
                    let _ = tx.send(());
                }
            }
            Err(errors) => {
                for error in errors {
                    log::warn!("Watch error: {error}");
                }
            }
        }
    })
    .context("Failed to create file watcher")?;

    // The parent is watched so editors that replace the file on save
    // are still seen.
    debouncer
        .watch(&parent, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {}", parent.display()))?;
    log::info!("Watching {} for changes", bib_file.display());

    while let Some(coalesced) = wait_for_trigger(&rx, converter.cancel_flag()) {
        log::info!(
            "{} changed ({coalesced} event{}), re-running",
            bib_file.display(),
            if coalesced == 1 { "" } else { "s" }
        );
        run_logged(converter);
    }
    log::info!("Stopped watching {}", bib_file.display());
    Ok(())
}
