//! Per-entry output directory: links, extraction, markdown

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bibmd_store::{FileFingerprints, Fingerprint, directory_fingerprint, fingerprint_files};

use crate::entry::{Entry, validate_key};
use crate::error::EntryError;
use crate::extract::Extractor;
use crate::resolve::resolve_attachments;

const SEPARATOR: &str = "\n\n---\n\n";

/// How an attachment is turned into markdown, decided by its guessed
/// media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Pdf,
    Text,
    Unsupported,
}

impl MediaKind {
    pub fn of(path: &Path) -> Self {
        match mime_guess::from_path(path).first() {
            Some(m) if m.essence_str() == "application/pdf" => Self::Pdf,
            Some(m) if m.type_() == mime_guess::mime::TEXT => Self::Text,
            _ => Self::Unsupported,
        }
    }
}

/// `{output_root}/{key}`, owned by exactly one entry.
#[derive(Debug, Clone)]
pub struct EntryWorkspace {
    key: String,
    dir: PathBuf,
}

impl EntryWorkspace {
    pub fn new(output_root: &Path, key: &str) -> Self {
        Self {
            key: key.to_string(),
            dir: output_root.join(key),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn markdown_path(&self) -> PathBuf {
        self.dir.join(format!("{}.md", self.key))
    }

    fn tmp_markdown_path(&self) -> PathBuf {
        self.dir.join(format!(".{}.md.tmp", self.key))
    }

    pub fn create(&self) -> Result<(), EntryError> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| EntryError::io(format!("create {}", self.dir.display()), e))
    }

    /// Link every attachment into the workspace under its file name,
    /// replacing whatever link or file already has that name.
    pub fn link_attachments(&self, attachments: &[PathBuf]) -> Result<(), EntryError> {
        for source in attachments {
            let Some(name) = source.file_name() else {
                log::warn!("{}: {} has no file name, not linked", self.key, source.display());
                continue;
            };
            let link = self.dir.join(name);
            if fs::symlink_metadata(&link).is_ok() {
                fs::remove_file(&link)
                    .map_err(|e| EntryError::io(format!("replace {}", link.display()), e))?;
            }
            let target = fs::canonicalize(source).unwrap_or_else(|_| source.clone());
            symlink(&target, &link)
                .map_err(|e| EntryError::io(format!("link {}", link.display()), e))?;
            log::debug!("{}: linked {} -> {}", self.key, link.display(), target.display());
        }
        Ok(())
    }

    /// Write the markdown through a hidden temp file and rename it into
    /// place, so the final name only ever holds a complete document.
    pub fn write_markdown(&self, content: &str) -> Result<PathBuf, EntryError> {
        let tmp = self.tmp_markdown_path();
        let final_path = self.markdown_path();
        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &final_path)
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&tmp);
            EntryError::io(format!("write {}", final_path.display()), e)
        })?;
        Ok(final_path)
    }

    /// Remove a temp file left behind by a killed worker.
    fn remove_stale_tmp(&self) {
        let tmp = self.tmp_markdown_path();
        if tmp.exists() {
            log::warn!("{}: removing stale {}", self.key, tmp.display());
            let _ = fs::remove_file(&tmp);
        }
    }

    /// Current fingerprint of everything in the workspace.
    pub fn fingerprint(&self) -> Fingerprint {
        directory_fingerprint(&self.dir)
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

/// Join fragments under the identifier heading, one rule between each.
pub fn compose_markdown(key: &str, fragments: &[String]) -> String {
    format!("# Citation Key: {key}{SEPARATOR}{}", fragments.join(SEPARATOR))
}

fn render(
    key: &str,
    source: &Path,
    workspace: &EntryWorkspace,
    extractor: &dyn Extractor,
) -> Result<Option<String>, EntryError> {
    match MediaKind::of(source) {
        MediaKind::Pdf => {
            let md = extractor
                .extract(source, workspace.dir())
                .map_err(|e| EntryError::Extraction {
                    path: source.to_path_buf(),
                    source: e,
                })?;
            log::info!("{key}: extracted {}", source.display());
            Ok(Some(md))
        }
        MediaKind::Text => {
            let content =
                fs::read_to_string(source).map_err(|e| EntryError::UnreadableText {
                    path: source.to_path_buf(),
                    source: e,
                })?;
            let ext = source
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            log::info!("{key}: included {}", source.display());
            Ok(Some(format!("```{ext}\n{content}\n```")))
        }
        MediaKind::Unsupported => {
            log::warn!("{key}: unsupported file type for {}", source.display());
            Ok(None)
        }
    }
}

/// What a successful conversion leaves behind.
#[derive(Debug, Clone)]
pub struct Converted {
    /// Attachment fingerprints taken before extraction. Empty when no
    /// attachment produced content.
    pub file_hashes: FileFingerprints,
    pub dir_hash: Fingerprint,
    pub markdown: Option<PathBuf>,
}

/// Convert one entry into its workspace under `output_root`.
///
/// Attachments are fingerprinted before anything is extracted, so a file
/// modified during extraction shows up as changed on the next run. The
/// workspace fingerprint is taken last, after every write.
pub fn convert_entry(
    entry: &Entry,
    output_root: &Path,
    base_dir: &Path,
    extractor: &dyn Extractor,
) -> Result<Converted, EntryError> {
    let key = entry.key.as_str();
    validate_key(key)?;

    let attachments = resolve_attachments(entry.file_field(), base_dir, key);
    if attachments.is_empty() {
        log::warn!("{key}: no files found");
        return Err(EntryError::NoAttachments);
    }
    let file_hashes = fingerprint_files(&attachments);

    let workspace = EntryWorkspace::new(output_root, key);
    workspace.create()?;
    workspace.remove_stale_tmp();
    workspace.link_attachments(&attachments)?;

    let mut fragments = Vec::new();
    for source in &attachments {
        if let Some(md) = render(key, source, &workspace, extractor)? {
            fragments.push(md);
        }
    }

    let (file_hashes, markdown) = if fragments.is_empty() {
        log::warn!("{key}: no attachment produced content");
        (FileFingerprints::new(), None)
    } else {
        let path = workspace.write_markdown(&compose_markdown(key, &fragments))?;
        (file_hashes, Some(path))
    };

    Ok(Converted {
        file_hashes,
        dir_hash: workspace.fingerprint(),
        markdown,
    })
}
