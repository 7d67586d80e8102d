//! Attachment references → existing files

use std::path::{Path, PathBuf};

/// Resolve a raw attachment field to the files it names that exist.
///
/// The field is split on `;`. Each segment is either a bare path or
/// `description:path`; only the first `:` separates the description. If
/// that path doesn't exist but ends in a `:type/subtype` suffix (JabRef
/// writes `description:path:application/pdf`), the path without the suffix
/// is tried. Relative paths are taken relative to `base_dir`.
///
/// Missing files are logged and dropped. Order is preserved and a path named
/// twice is returned once.
pub fn resolve_attachments(file_field: &str, base_dir: &Path, key: &str) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = Vec::new();
    for segment in file_field.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let raw = match segment.split_once(':') {
            Some((_, rest)) => rest.trim(),
            None => segment,
        };
        if raw.is_empty() {
            log::debug!("{key}: attachment segment {segment:?} has no path");
            continue;
        }

        match locate(raw, base_dir) {
            Some(path) => {
                if !paths.contains(&path) {
                    log::debug!("{key}: found {}", path.display());
                    paths.push(path);
                }
            }
            None => log::warn!("{key}: could not find file {raw}"),
        }
    }
    paths
}

fn locate(raw: &str, base_dir: &Path) -> Option<PathBuf> {
    let path = base_dir.join(raw);
    if path.exists() {
        return Some(path);
    }
    let (stripped, media_type) = raw.rsplit_once(':')?;
    if stripped.is_empty() || !media_type.contains('/') {
        return None;
    }
    let path = base_dir.join(stripped.trim());
    path.exists().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn empty_field_resolves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_attachments("", dir.path(), "K").is_empty());
        assert!(resolve_attachments(" ; ;", dir.path(), "K").is_empty());
    }

    #[test]
    fn bare_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = touch(dir.path(), "a.pdf");
        let field = pdf.display().to_string();
        assert_eq!(resolve_attachments(&field, Path::new("/"), "K"), vec![pdf]);
    }

    #[test]
    fn description_prefix_is_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = touch(dir.path(), "a.pdf");
        let field = format!("Full Text PDF:{}", pdf.display());
        assert_eq!(resolve_attachments(&field, Path::new("/"), "K"), vec![pdf]);
    }

    #[test]
    fn relative_paths_use_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = touch(dir.path(), "pdf_dir/a.pdf");
        assert_eq!(
            resolve_attachments("pdf_dir/a.pdf", dir.path(), "K"),
            vec![pdf]
        );
    }

    #[test]
    fn missing_files_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let txt = touch(dir.path(), "notes.txt");
        let field = format!("gone.pdf;Notes:{}", txt.display());
        assert_eq!(resolve_attachments(&field, dir.path(), "K"), vec![txt]);
    }

    #[test]
    fn description_without_path_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_attachments("Snapshot:", dir.path(), "K").is_empty());
    }

    #[test]
    fn jabref_media_type_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = touch(dir.path(), "a.pdf");
        let field = format!("Paper:{}:application/pdf", pdf.display());
        assert_eq!(resolve_attachments(&field, Path::new("/"), "K"), vec![pdf]);
    }

    #[test]
    fn order_kept_and_duplicates_collapsed() {
        let dir = tempfile::tempdir().unwrap();
        let b = touch(dir.path(), "b.txt");
        let a = touch(dir.path(), "a.pdf");
        let field = "b.txt;a.pdf;Again:b.txt";
        assert_eq!(resolve_attachments(field, dir.path(), "K"), vec![b, a]);
    }
}
