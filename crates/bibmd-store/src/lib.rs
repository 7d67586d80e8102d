//! bibmd-store: fingerprints and the memoization store
//!
//! Blake3 content fingerprints for attachments and entry workspaces, and
//! a SQLite-backed record of what was fingerprinted at the last
//! successful conversion of each bibliography entry.

pub mod fingerprint;
pub mod memo;
pub mod record;

pub use fingerprint::{
    Fingerprint, directory_fingerprint, file_fingerprint, fingerprint_files, hash_file,
};
pub use memo::{MemoStore, StoreError};
pub use record::{EntryRecord, FileFingerprints, RecordDiff};
