//! Worker side of the pool: one unit in, one result out
//!
//! Units and results are plain values so they can cross a process
//! boundary as JSON: the unit on the worker's stdin, the result on its
//! stdout.

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use bibmd_store::{EntryRecord, FileFingerprints, Fingerprint};
use serde::{Deserialize, Serialize};

use crate::entry::Entry;
use crate::extract::{CommandExtractor, Extractor};
use crate::workspace::convert_entry;

/// Everything a worker needs to convert one entry. Workers never see the
/// memoization store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnit {
    pub entry: Entry,
    pub output_root: PathBuf,
    pub base_dir: PathBuf,
    pub pdf_command: Vec<String>,
}

/// Outcome of one unit. Only `success` results are ever committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub key: String,
    pub file_hashes: FileFingerprints,
    pub dir_hash: Fingerprint,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessingResult {
    pub fn failed(key: impl Into<String>, error: impl ToString) -> Self {
        Self {
            key: key.into(),
            file_hashes: FileFingerprints::new(),
            dir_hash: Fingerprint::empty(),
            success: false,
            error: Some(error.to_string()),
        }
    }

    /// Store record for a successful result; `None` for a failure.
    pub fn into_record(self) -> Option<EntryRecord> {
        self.success
            .then(|| EntryRecord::new(self.key, self.file_hashes, self.dir_hash))
    }
}

/// Convert one unit with `extractor`. Entry-level errors become a failed
/// result; nothing here returns `Err`.
pub fn process(unit: &WorkUnit, extractor: &dyn Extractor) -> ProcessingResult {
    let key = unit.entry.key.clone();
    match convert_entry(&unit.entry, &unit.output_root, &unit.base_dir, extractor) {
        Ok(done) => ProcessingResult {
            key,
            file_hashes: done.file_hashes,
            dir_hash: done.dir_hash,
            success: true,
            error: None,
        },
        Err(e) => {
            log::error!("{key}: {e}");
            ProcessingResult::failed(key, e)
        }
    }
}

/// Read one unit from `input`, convert it with the unit's PDF command and
/// write the result to `output`.
pub fn serve(input: impl Read, output: impl Write) -> Result<()> {
    serve_with(input, output, |unit| {
        Box::new(CommandExtractor::new(unit.pdf_command.clone()))
    })
}

/// Like [`serve`], with the extractor built by `make_extractor`.
pub fn serve_with<F>(mut input: impl Read, mut output: impl Write, make_extractor: F) -> Result<()>
where
    F: FnOnce(&WorkUnit) -> Box<dyn Extractor>,
{
    let mut raw = String::new();
    input
        .read_to_string(&mut raw)
        .context("failed to read work unit")?;
    let unit: WorkUnit = serde_json::from_str(&raw).context("malformed work unit")?;

    let extractor = make_extractor(&unit);
    let result = process(&unit, extractor.as_ref());

    serde_json::to_writer(&mut output, &result).context("failed to write result")?;
    output.flush().context("failed to flush result")?;
    Ok(())
}
