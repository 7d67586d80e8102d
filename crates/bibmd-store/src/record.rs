//! Per-entry record of the fingerprints seen at the last successful conversion

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::fingerprint::Fingerprint;

/// Attachment path (as resolved) → content fingerprint.
pub type FileFingerprints = BTreeMap<String, Fingerprint>;

/// What the store remembers about one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    pub key: String,
    pub file_hashes: FileFingerprints,
    pub dir_hash: Fingerprint,
    pub last_processed: DateTime<Utc>,
}

/// Outcome of comparing a record against fingerprints taken now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordDiff {
    Unchanged,
    /// Attachment set or any attachment's content differs.
    AttachmentsChanged,
    /// Attachments match but the workspace contents don't.
    OutputChanged,
}

impl EntryRecord {
    pub fn new(key: impl Into<String>, file_hashes: FileFingerprints, dir_hash: Fingerprint) -> Self {
        Self {
            key: key.into(),
            file_hashes,
            dir_hash,
            last_processed: Utc::now(),
        }
    }

    /// Compare by value: same paths with the same fingerprints, and the same
    /// workspace fingerprint.
    pub fn diff(&self, files: &FileFingerprints, dir: &Fingerprint) -> RecordDiff {
        if self.file_hashes != *files {
            RecordDiff::AttachmentsChanged
        } else if self.dir_hash != *dir {
            RecordDiff::OutputChanged
        } else {
            RecordDiff::Unchanged
        }
    }
}
