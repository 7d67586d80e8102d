//! Options for one conversion run

use std::path::{Path, PathBuf};

use crate::extract::DEFAULT_PDF_COMMAND;

/// Store file name inside the output root.
pub const STORE_FILE: &str = "processed_files.db";

/// Output root is `{stem}-{suffix}` unless given explicitly.
pub const DEFAULT_SUFFIX: &str = "bibmd";

/// Pool size when none is configured.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Everything a run needs, passed in explicitly.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub bib_file: PathBuf,
    pub output_root: PathBuf,
    /// Relative attachment paths are resolved against this directory.
    pub base_dir: PathBuf,
    pub workers: usize,
    pub force: bool,
    pub dry_run: bool,
    pub pdf_command: Vec<String>,
}

impl ConvertOptions {
    /// Defaults for `bib_file`: output root `{cwd}/{stem}-bibmd`, attachments
    /// relative to the bibliography's directory.
    pub fn new(bib_file: impl Into<PathBuf>) -> Self {
        let bib_file = bib_file.into();
        let output_root = default_output_root(&bib_file, DEFAULT_SUFFIX);
        let base_dir = match bib_file.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self {
            bib_file,
            output_root,
            base_dir,
            workers: default_workers(),
            force: false,
            dry_run: false,
            pdf_command: DEFAULT_PDF_COMMAND.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.output_root.join(STORE_FILE)
    }

    pub fn workspace_dir(&self, key: &str) -> PathBuf {
        self.output_root.join(key)
    }
}

/// `{stem}-{suffix}` in the current directory.
pub fn default_output_root(bib_file: &Path, suffix: &str) -> PathBuf {
    let stem = bib_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bibliography".to_string());
    PathBuf::from(format!("{stem}-{suffix}"))
}
