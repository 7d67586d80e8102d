//! Dispatch engine: plan which entries are stale, convert them on a
//! bounded pool, commit each success as it arrives
//!
//! One run is one pass:
//! 1. Discover: entries from the bibliography, in file order
//! 2. Plan: fingerprint attachments and workspaces, compare with the store
//! 3. Fan out: pool threads claim stale entries from a [`WorkQueue`] and
//!    hand them to the [`Executor`]
//! 4. Collect: the calling thread receives results in arrival order and
//!    upserts every success before looking at the next one
//!
//! The store connection never leaves the calling thread.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bibmd_core::{ProgressContext, SharedProgress, WorkQueue, shutdown_flag};
use bibmd_store::{
    EntryRecord, FileFingerprints, Fingerprint, MemoStore, RecordDiff, StoreError,
    directory_fingerprint, fingerprint_files,
};
use rayon::prelude::*;

use crate::bibtex;
use crate::config::ConvertOptions;
use crate::entry::{Entry, validate_key};
use crate::executor::Executor;
use crate::resolve::resolve_attachments;
use crate::worker::{ProcessingResult, WorkUnit};

/// Why an entry is (or isn't) part of this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStatus {
    /// No record in the store.
    New,
    AttachmentsChanged,
    OutputChanged,
    /// Stale because the run was forced.
    Forced,
    UpToDate,
    /// Identifier missing or unusable; never processed.
    Invalid(String),
    /// Identifier already seen earlier in the bibliography.
    Duplicate,
}

impl PlanStatus {
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            Self::New | Self::AttachmentsChanged | Self::OutputChanged | Self::Forced
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::AttachmentsChanged => "CHANGED",
            Self::OutputChanged => "OUTPUT_CHANGED",
            Self::Forced => "FORCED",
            Self::UpToDate => "UP_TO_DATE",
            Self::Invalid(_) => "INVALID",
            Self::Duplicate => "DUPLICATE",
        }
    }

    fn from_record(record: Option<&EntryRecord>, files: &FileFingerprints, dir: &Fingerprint) -> Self {
        match record.map(|r| r.diff(files, dir)) {
            None => Self::New,
            Some(RecordDiff::AttachmentsChanged) => Self::AttachmentsChanged,
            Some(RecordDiff::OutputChanged) => Self::OutputChanged,
            Some(RecordDiff::Unchanged) => Self::UpToDate,
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One entry with the fingerprints taken while planning.
#[derive(Debug, Clone)]
pub struct PlannedEntry {
    pub entry: Entry,
    pub status: PlanStatus,
    pub attachments: Vec<PathBuf>,
    pub file_hashes: FileFingerprints,
    pub dir_hash: Fingerprint,
}

impl PlannedEntry {
    fn skipped(entry: Entry, status: PlanStatus) -> Self {
        Self {
            entry,
            status,
            attachments: Vec::new(),
            file_hashes: FileFingerprints::new(),
            dir_hash: Fingerprint::empty(),
        }
    }
}

/// Every discovered entry, in bibliography order.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub entries: Vec<PlannedEntry>,
}

impl Plan {
    pub fn stale(&self) -> impl Iterator<Item = &PlannedEntry> {
        self.entries.iter().filter(|p| p.status.is_stale())
    }

    pub fn stale_count(&self) -> usize {
        self.stale().count()
    }

    pub fn up_to_date_count(&self) -> usize {
        self.count(|s| *s == PlanStatus::UpToDate)
    }

    /// Invalid and duplicate identifiers.
    pub fn skipped_count(&self) -> usize {
        self.count(|s| matches!(s, PlanStatus::Invalid(_) | PlanStatus::Duplicate))
    }

    fn count(&self, pred: impl Fn(&PlanStatus) -> bool) -> usize {
        self.entries.iter().filter(|p| pred(&p.status)).count()
    }

    /// Log what a real run would do.
    pub fn report(&self) {
        for planned in &self.entries {
            let key = &planned.entry.key;
            match &planned.status {
                s if s.is_stale() => {
                    log::info!("Would process {key} [{s}]");
                    if planned.attachments.is_empty() {
                        log::info!("    (no attachments resolved)");
                    }
                    for path in &planned.attachments {
                        log::info!("    {}", path.display());
                    }
                }
                PlanStatus::UpToDate => log::debug!("{key}: up to date"),
                s => log::debug!("{key:?}: skipped [{s}]"),
            }
        }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Entries discovered in the bibliography.
    pub total: usize,
    /// Invalid or duplicate identifiers, never dispatched.
    pub invalid: usize,
    pub up_to_date: usize,
    /// Stale entries handed to the pool (or that would be, in a dry run).
    pub planned: usize,
    /// Successful results committed to the store.
    pub processed: usize,
    pub failed: usize,
    /// `(identifier, error)` for each failed entry, in arrival order.
    pub failures: Vec<(String, String)>,
    pub interrupted: bool,
    pub dry_run: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    fn from_plan(plan: &Plan, dry_run: bool) -> Self {
        Self {
            total: plan.entries.len(),
            invalid: plan.skipped_count(),
            up_to_date: plan.up_to_date_count(),
            planned: plan.stale_count(),
            dry_run,
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.interrupted
    }

    pub fn log(&self) {
        if self.dry_run {
            log::info!(
                "Dry run: {} of {} entries would be processed ({} up to date, {} skipped)",
                self.planned,
                self.total,
                self.up_to_date,
                self.invalid
            );
            return;
        }
        log::info!(
            "Processed {}/{} entries, {} failed ({} up to date, {} skipped) [{:.1}s]",
            self.processed,
            self.planned,
            self.failed,
            self.up_to_date,
            self.invalid,
            self.elapsed.as_secs_f64()
        );
        for (key, error) in &self.failures {
            log::warn!("  {key}: {error}");
        }
        if self.interrupted {
            log::warn!("Run interrupted; unprocessed entries stay stale");
        }
    }
}

/// Runs conversions for one bibliography.
pub struct Converter<X> {
    options: ConvertOptions,
    executor: X,
    progress: SharedProgress,
    cancel: &'static AtomicBool,
}

impl<X: Executor> Converter<X> {
    pub fn new(options: ConvertOptions, executor: X) -> Self {
        Self {
            options,
            executor,
            progress: Arc::new(ProgressContext::hidden()),
            cancel: shutdown_flag(),
        }
    }

    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Flag that stops new units from being claimed. Defaults to the
    /// process-wide shutdown flag.
    pub fn with_cancel_flag(mut self, cancel: &'static AtomicBool) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    pub fn cancel_flag(&self) -> &'static AtomicBool {
        self.cancel
    }

    fn build_pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers.max(1))
            .thread_name(|i| format!("bibmd-{i}"))
            .build()
            .context("Failed to create thread pool")
    }

    /// Parse the bibliography and run once. Only an unreadable or
    /// unparseable bibliography (or a store failure) is an `Err`.
    pub fn run(&self) -> Result<RunSummary> {
        let entries = bibtex::load(&self.options.bib_file)?;
        self.run_entries(entries)
    }

    /// Plan against the store without writing anything. A store that does
    /// not exist yet makes every valid entry `NEW`.
    pub fn plan(&self, entries: Vec<Entry>) -> Result<Plan> {
        let pool = self.build_pool()?;
        let store = MemoStore::open_read_only(&self.options.store_path())
            .context("Failed to open store")?;
        self.plan_with(&pool, entries, store.as_ref())
    }

    pub fn run_entries(&self, entries: Vec<Entry>) -> Result<RunSummary> {
        let start = Instant::now();
        let opts = &self.options;
        log::info!(
            "Converting {} ({} entries) into {}, workers={}{}{}",
            opts.bib_file.display(),
            entries.len(),
            opts.output_root.display(),
            opts.workers,
            if opts.force { ", force" } else { "" },
            if opts.dry_run { ", dry run" } else { "" },
        );

        if opts.dry_run {
            let plan = self.plan(entries)?;
            plan.report();
            let mut summary = RunSummary::from_plan(&plan, true);
            summary.elapsed = start.elapsed();
            return Ok(summary);
        }

        std::fs::create_dir_all(&opts.output_root).with_context(|| {
            format!("Cannot create output directory {}", opts.output_root.display())
        })?;
        let store = MemoStore::open(&opts.store_path()).context("Failed to open store")?;
        let pool = self.build_pool()?;

        let plan = self.plan_with(&pool, entries, Some(&store))?;
        let mut summary = RunSummary::from_plan(&plan, false);
        let units: Vec<WorkUnit> = plan.stale().map(|p| self.unit_for(&p.entry)).collect();

        if units.is_empty() {
            log::info!("All {} entries up to date", summary.up_to_date);
        } else {
            self.dispatch(&pool, units, &store, &mut summary)?;
        }
        summary.elapsed = start.elapsed();
        Ok(summary)
    }

    fn unit_for(&self, entry: &Entry) -> WorkUnit {
        WorkUnit {
            entry: entry.clone(),
            output_root: self.options.output_root.clone(),
            base_dir: self.options.base_dir.clone(),
            pdf_command: self.options.pdf_command.clone(),
        }
    }

    fn plan_with(
        &self,
        pool: &rayon::ThreadPool,
        entries: Vec<Entry>,
        store: Option<&MemoStore>,
    ) -> Result<Plan> {
        enum Prior {
            Skip(PlanStatus),
            Record(Option<EntryRecord>),
        }

        // Sequential: identifier checks and store lookups stay on this thread
        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(entries.len());
        for entry in entries {
            let prior = if let Err(e) = validate_key(&entry.key) {
                log::warn!("Skipping entry {:?}: {e}", entry.key);
                Prior::Skip(PlanStatus::Invalid(e.to_string()))
            } else if !seen.insert(entry.key.clone()) {
                log::warn!("{}: duplicate identifier, keeping the first entry", entry.key);
                Prior::Skip(PlanStatus::Duplicate)
            } else {
                Prior::Record(lookup(store, &entry.key)?)
            };
            candidates.push((entry, prior));
        }

        let options = &self.options;
        let entries = pool.install(|| {
            candidates
                .into_par_iter()
                .map(|(entry, prior)| {
                    let record = match prior {
                        Prior::Skip(status) => return PlannedEntry::skipped(entry, status),
                        Prior::Record(r) => r,
                    };
                    let attachments =
                        resolve_attachments(entry.file_field(), &options.base_dir, &entry.key);
                    let file_hashes = fingerprint_files(&attachments);
                    let dir_hash = directory_fingerprint(&options.workspace_dir(&entry.key));
                    let status = if options.force {
                        PlanStatus::Forced
                    } else {
                        PlanStatus::from_record(record.as_ref(), &file_hashes, &dir_hash)
                    };
                    log::debug!("{}: {status}", entry.key);
                    PlannedEntry {
                        entry,
                        status,
                        attachments,
                        file_hashes,
                        dir_hash,
                    }
                })
                .collect()
        });
        Ok(Plan { entries })
    }

    fn dispatch(
        &self,
        pool: &rayon::ThreadPool,
        units: Vec<WorkUnit>,
        store: &MemoStore,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let queue = WorkQueue::new(units, self.cancel);
        let threads = pool.current_num_threads().min(queue.total());
        log::info!("Dispatching {} entries to {threads} workers", queue.total());

        let pb = self.progress.entry_bar("convert", queue.total() as u64);
        let halt = AtomicBool::new(false);
        let executor = &self.executor;
        let mut commit_error: Option<anyhow::Error> = None;

        pool.in_place_scope(|scope| {
            let (tx, rx) = mpsc::channel::<ProcessingResult>();
            for _ in 0..threads {
                let tx = tx.clone();
                let queue = &queue;
                let halt = &halt;
                scope.spawn(move |_| {
                    while !halt.load(Ordering::Relaxed) {
                        let Some(unit) = queue.next() else { break };
                        log::debug!("{}: processing", unit.entry.key);
                        if tx.send(executor.execute(unit)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            for result in rx {
                pb.inc(1);
                pb.set_message(result.key.clone());
                if commit_error.is_some() {
                    // Store is unusable; in-flight results are dropped
                    continue;
                }
                if !result.success {
                    let error = result.error.clone().unwrap_or_default();
                    summary.failed += 1;
                    summary.failures.push((result.key, error));
                    continue;
                }
                let key = result.key.clone();
                let Some(record) = result.into_record() else { continue };
                match store.upsert(&record) {
                    Ok(()) => {
                        summary.processed += 1;
                        log::info!("{key}: done");
                    }
                    Err(e) => {
                        halt.store(true, Ordering::Relaxed);
                        commit_error =
                            Some(anyhow::Error::new(e).context(format!("Failed to commit {key}")));
                    }
                }
            }
        });
        pb.finish_and_clear();

        summary.interrupted = self.cancel.load(Ordering::Relaxed) && queue.claimed() < queue.total();
        match commit_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Store lookup for planning. A record that can't be decoded is treated as
/// absent so the entry gets rebuilt; any other store error ends the run.
fn lookup(store: Option<&MemoStore>, key: &str) -> Result<Option<EntryRecord>> {
    let Some(store) = store else { return Ok(None) };
    match store.get(key) {
        Ok(record) => Ok(record),
        Err(e @ StoreError::Corrupt { .. }) => {
            log::warn!("{key}: {e}; treating as new");
            Ok(None)
        }
        Err(e) => Err(e).with_context(|| format!("Failed to read store record for {key}")),
    }
}
