//! bibmd-convert: incremental conversion of bibliography attachments
//!
//! Decides which bibliography entries are stale by comparing content
//! fingerprints against the memoization store, fans stale entries out to a
//! bounded worker pool, and commits each successful result as it arrives.

pub mod bibtex;
pub mod config;
pub mod dispatch;
pub mod entry;
pub mod error;
pub mod executor;
pub mod extract;
pub mod resolve;
pub mod watch;
pub mod worker;
pub mod workspace;

pub use config::{ConvertOptions, DEFAULT_SUFFIX, STORE_FILE, default_output_root, default_workers};
pub use dispatch::{Converter, Plan, PlanStatus, PlannedEntry, RunSummary};
pub use entry::Entry;
pub use error::EntryError;
pub use executor::{Executor, InProcessExecutor, SubprocessExecutor};
pub use extract::{CommandExtractor, DEFAULT_PDF_COMMAND, ExtractError, Extractor};
pub use resolve::resolve_attachments;
pub use worker::{ProcessingResult, WorkUnit};
pub use watch::watch;
pub use workspace::{Converted, EntryWorkspace, MediaKind, convert_entry};
