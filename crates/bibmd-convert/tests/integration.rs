//! End-to-end runs against a temporary bibliography
//!
//! All runs use the in-process executor with a fake PDF extractor, except
//! the subprocess tests at the bottom which use `sh` as the worker.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use bibmd_convert::{
    ConvertOptions, Converter, Entry, ExtractError, Extractor, InProcessExecutor, PlanStatus,
    SubprocessExecutor,
};
use bibmd_store::{MemoStore, directory_fingerprint};
use tempfile::TempDir;

static NEVER: AtomicBool = AtomicBool::new(false);

/// Writes one image next to the markdown, like a real PDF converter.
struct FakePdf;

impl Extractor for FakePdf {
    fn extract(&self, source: &Path, output_dir: &Path) -> Result<String, ExtractError> {
        let stem = source.file_stem().unwrap().to_string_lossy();
        fs::write(output_dir.join(format!("{stem}-1.png")), b"png").unwrap();
        Ok(format!("extracted {}", source.display()))
    }
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn out(&self) -> PathBuf {
        self.root().join("out")
    }

    fn write(&self, rel: &str, content: &[u8]) -> PathBuf {
        let path = self.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn bib(&self, text: &str) -> PathBuf {
        self.write("library.bib", text.as_bytes())
    }

    fn options(&self) -> ConvertOptions {
        let mut opts = ConvertOptions::new(self.root().join("library.bib"));
        opts.output_root = self.out();
        opts.workers = 4;
        opts
    }

    fn converter(&self, opts: ConvertOptions) -> Converter<InProcessExecutor<FakePdf>> {
        Converter::new(opts, InProcessExecutor::new(FakePdf)).with_cancel_flag(&NEVER)
    }

    fn default_converter(&self) -> Converter<InProcessExecutor<FakePdf>> {
        self.converter(self.options())
    }

    fn stored_keys(&self) -> Vec<String> {
        let store = MemoStore::open_read_only(&self.out().join("processed_files.db"))
            .unwrap()
            .expect("store exists");
        store.list().unwrap().into_iter().map(|r| r.key).collect()
    }

    fn statuses(&self) -> Vec<(String, PlanStatus)> {
        let conv = self.default_converter();
        let entries = bibmd_convert::bibtex::load(&conv.options().bib_file).unwrap();
        conv.plan(entries)
            .unwrap()
            .entries
            .into_iter()
            .map(|p| (p.entry.key, p.status))
            .collect()
    }

    fn stale_keys(&self) -> Vec<String> {
        self.statuses()
            .into_iter()
            .filter(|(_, s)| s.is_stale())
            .map(|(k, _)| k)
            .collect()
    }
}

const THREE: &str = r#"
@article{A, title = {Alpha}, file = {Full Text PDF:papers/a.pdf:application/pdf}}
@misc{B, title = {Beta}, file = {Notes:notes/b.txt}}
@book{C, title = {Gamma}, file = {papers/c.pdf}}
"#;

fn three_entry_fixture() -> Fixture {
    let fx = Fixture::new();
    fx.bib(THREE);
    fx.write("papers/a.pdf", b"%PDF-a");
    fx.write("notes/b.txt", b"beta notes");
    fx.write("papers/c.pdf", b"%PDF-c");
    fx
}

#[test]
fn second_run_finds_nothing_stale() {
    let fx = three_entry_fixture();
    let conv = fx.default_converter();

    let first = conv.run().unwrap();
    assert_eq!((first.planned, first.processed, first.failed), (3, 3, 0));

    let second = conv.run().unwrap();
    assert_eq!(second.planned, 0);
    assert_eq!(second.up_to_date, 3);
    assert!(fx.stale_keys().is_empty());
}

#[test]
fn changed_attachment_marks_only_its_entry() {
    let fx = three_entry_fixture();
    fx.default_converter().run().unwrap();

    fx.write("notes/b.txt", b"beta notez");

    let statuses = fx.statuses();
    assert_eq!(statuses[0].1, PlanStatus::UpToDate);
    assert_eq!(statuses[1].1, PlanStatus::AttachmentsChanged);
    assert_eq!(statuses[2].1, PlanStatus::UpToDate);
}

#[test]
fn touching_mtime_alone_changes_nothing() {
    let fx = three_entry_fixture();
    fx.default_converter().run().unwrap();

    // Same bytes rewritten: new mtime, same content
    fx.write("papers/a.pdf", b"%PDF-a");
    assert!(fx.stale_keys().is_empty());
}

#[test]
fn tampered_output_marks_entry_stale() {
    let fx = three_entry_fixture();
    fx.default_converter().run().unwrap();

    fs::remove_file(fx.out().join("A/A.md")).unwrap();
    fs::write(fx.out().join("C/c-1.png"), b"other").unwrap();

    let statuses = fx.statuses();
    assert_eq!(statuses[0].1, PlanStatus::OutputChanged);
    assert_eq!(statuses[1].1, PlanStatus::UpToDate);
    assert_eq!(statuses[2].1, PlanStatus::OutputChanged);

    // Reprocessing restores the output
    let summary = fx.default_converter().run().unwrap();
    assert_eq!(summary.processed, 2);
    assert!(fx.out().join("A/A.md").exists());
    assert!(fx.stale_keys().is_empty());
}

#[cfg(unix)]
#[test]
fn workspace_links_hash_by_target_not_content() {
    let fx = three_entry_fixture();
    fx.default_converter().run().unwrap();
    let ws = fx.out().join("A");
    let before = directory_fingerprint(&ws);

    // Same link, different bytes behind it
    let source = fx.root().join("papers/a.pdf");
    fs::write(&source, b"%PDF-a, revised").unwrap();
    assert_eq!(directory_fingerprint(&ws), before);

    // Same name and same bytes, different target
    let copy = fx.write("mirror/a.pdf", b"%PDF-a, revised");
    let link = ws.join("a.pdf");
    fs::remove_file(&link).unwrap();
    std::os::unix::fs::symlink(&copy, &link).unwrap();
    assert_ne!(directory_fingerprint(&ws), before);
}

#[test]
fn force_reprocesses_everything() {
    let fx = three_entry_fixture();
    fx.default_converter().run().unwrap();

    let mut opts = fx.options();
    opts.force = true;
    let conv = fx.converter(opts);
    let plan = conv
        .plan(bibmd_convert::bibtex::load(&conv.options().bib_file).unwrap())
        .unwrap();
    assert!(plan.entries.iter().all(|p| p.status == PlanStatus::Forced));

    let summary = conv.run().unwrap();
    assert_eq!(summary.processed, 3);
}

#[test]
fn dry_run_on_fresh_bibliography_creates_nothing() {
    let fx = three_entry_fixture();
    let mut opts = fx.options();
    opts.dry_run = true;

    let summary = fx.converter(opts).run().unwrap();
    assert!(summary.dry_run);
    assert_eq!(summary.planned, 3);
    assert_eq!(summary.processed, 0);
    assert!(!fx.out().exists());
}

#[test]
fn dry_run_leaves_existing_output_untouched() {
    let fx = three_entry_fixture();
    fx.default_converter().run().unwrap();
    fx.write("notes/b.txt", b"rewritten");

    let store_path = fx.out().join("processed_files.db");
    let store_before = fs::read(&store_path).unwrap();
    let ws_before = directory_fingerprint(&fx.out().join("B"));

    let mut opts = fx.options();
    opts.dry_run = true;
    let summary = fx.converter(opts).run().unwrap();

    assert_eq!(summary.planned, 1);
    assert_eq!(fs::read(&store_path).unwrap(), store_before);
    assert_eq!(directory_fingerprint(&fx.out().join("B")), ws_before);
    assert_eq!(fx.stale_keys(), vec!["B"]);
}

#[test]
fn missing_attachment_fails_only_its_entry() {
    let fx = three_entry_fixture();
    fs::remove_file(fx.root().join("papers/c.pdf")).unwrap();

    let summary = fx.default_converter().run().unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].0, "C");
    assert_eq!(fx.stored_keys(), vec!["A", "B"]);

    // Failed entries stay stale and are retried by the next run
    assert_eq!(fx.stale_keys(), vec!["C"]);
}

#[test]
fn failed_reprocessing_keeps_prior_record() {
    let fx = three_entry_fixture();
    fx.default_converter().run().unwrap();
    let store_path = fx.out().join("processed_files.db");
    let before = MemoStore::open_read_only(&store_path)
        .unwrap()
        .unwrap()
        .get("B")
        .unwrap()
        .unwrap();

    // Not UTF-8, so the text attachment can no longer be read
    fx.write("notes/b.txt", b"\xff\xfe\x00broken");
    let summary = fx.default_converter().run().unwrap();
    assert_eq!((summary.processed, summary.failed), (0, 1));
    assert_eq!(summary.failures[0].0, "B");

    let after = MemoStore::open_read_only(&store_path)
        .unwrap()
        .unwrap()
        .get("B")
        .unwrap()
        .unwrap();
    assert_eq!(after, before);
    assert_eq!(fx.stale_keys(), vec!["B"]);
}

static STOP_AFTER_FIRST: AtomicBool = AtomicBool::new(false);

/// Raises the cancel flag once its first unit has been extracted.
struct InterruptAfterFirst;

impl Extractor for InterruptAfterFirst {
    fn extract(&self, source: &Path, _output_dir: &Path) -> Result<String, ExtractError> {
        STOP_AFTER_FIRST.store(true, Ordering::Relaxed);
        Ok(format!("extracted {}", source.display()))
    }
}

#[test]
fn interrupted_run_keeps_completed_entries() {
    let fx = Fixture::new();
    fx.bib("@misc{A, file = {a.pdf}}\n@misc{B, file = {b.pdf}}\n@misc{C, file = {c.pdf}}\n");
    for name in ["a.pdf", "b.pdf", "c.pdf"] {
        fx.write(name, b"%PDF");
    }
    let mut opts = fx.options();
    opts.workers = 1;

    let summary = Converter::new(opts, InProcessExecutor::new(InterruptAfterFirst))
        .with_cancel_flag(&STOP_AFTER_FIRST)
        .run()
        .unwrap();

    assert!(summary.interrupted);
    assert_eq!((summary.planned, summary.processed, summary.failed), (3, 1, 0));
    assert_eq!(fx.stored_keys(), vec!["A"]);
    assert_eq!(fx.stale_keys(), vec!["B", "C"]);
}

#[test]
fn pdf_text_and_missing_file_end_to_end() {
    let fx = Fixture::new();
    fx.bib(
        r#"
@article{A, file = {Paper:papers/a.pdf}}
@misc{B, file = {notes/b.txt}}
@misc{C, title = {No attachments here}}
"#,
    );
    fx.write("papers/a.pdf", b"%PDF");
    fx.write("notes/b.txt", b"plain text");

    let summary = fx.default_converter().run().unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].0, "C");

    let a_md = fs::read_to_string(fx.out().join("A/A.md")).unwrap();
    assert!(a_md.starts_with("# Citation Key: A\n\n---\n\nextracted "));
    assert!(fx.out().join("A/a-1.png").exists());
    assert!(
        fs::symlink_metadata(fx.out().join("A/a.pdf"))
            .unwrap()
            .file_type()
            .is_symlink()
    );

    let b_md = fs::read_to_string(fx.out().join("B/B.md")).unwrap();
    assert_eq!(b_md, "# Citation Key: B\n\n---\n\n```txt\nplain text\n```");

    assert!(!fx.out().join("C").exists());
    assert_eq!(fx.stored_keys(), vec!["A", "B"]);
}

#[test]
fn several_attachments_join_with_rules() {
    let fx = Fixture::new();
    fx.bib("@misc{K, file = {p.pdf;notes.txt;fig.svg.bin}}");
    fx.write("p.pdf", b"%PDF");
    fx.write("notes.txt", b"n");
    fx.write("fig.svg.bin", b"\x00\x01");

    let summary = fx.default_converter().run().unwrap();
    assert_eq!(summary.processed, 1);
    let md = fs::read_to_string(fx.out().join("K/K.md")).unwrap();
    assert_eq!(md.matches("\n\n---\n\n").count(), 2);
    assert!(md.ends_with("```txt\nn\n```"));
}

#[test]
fn unsupported_only_entry_is_recorded_but_stays_stale() {
    let fx = Fixture::new();
    fx.bib("@misc{P, file = {fig.png}}");
    fx.write("fig.png", b"png");

    let summary = fx.default_converter().run().unwrap();
    assert_eq!((summary.processed, summary.failed), (1, 0));
    assert!(!fx.out().join("P/P.md").exists());

    let store = MemoStore::open_read_only(&fx.out().join("processed_files.db"))
        .unwrap()
        .unwrap();
    assert!(store.get("P").unwrap().unwrap().file_hashes.is_empty());
    assert_eq!(fx.statuses()[0].1, PlanStatus::AttachmentsChanged);
}

#[test]
fn unusable_and_duplicate_keys_are_skipped() {
    let fx = Fixture::new();
    fx.bib(
        r#"
@misc{../escape, file = {a.txt}}
@misc{Dup, file = {a.txt}}
@misc{Dup, file = {b.txt}}
"#,
    );
    fx.write("a.txt", b"a");
    fx.write("b.txt", b"b");

    let summary = fx.default_converter().run().unwrap();
    assert_eq!(summary.invalid, 2);
    assert_eq!(summary.processed, 1);
    assert!(!fx.root().join("escape").exists());
    let md = fs::read_to_string(fx.out().join("Dup/Dup.md")).unwrap();
    assert!(md.contains("```txt\na\n```"));
}

#[test]
fn unreadable_bibliography_fails_the_run() {
    let fx = Fixture::new();
    assert!(fx.default_converter().run().is_err());

    fx.bib("@misc{K, title = {never closed");
    assert!(fx.default_converter().run().is_err());
    assert!(!fx.out().join("processed_files.db").exists());
}

#[test]
fn entries_can_be_passed_directly() {
    let fx = Fixture::new();
    fx.write("x.txt", b"x");
    let conv = fx.default_converter();
    let entries = vec![Entry::new("X", "misc").with_field("file", "x.txt")];

    let summary = conv.run_entries(entries).unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(fx.stored_keys(), vec!["X"]);
}

#[cfg(unix)]
mod subprocess {
    use super::*;

    /// A worker that answers for A with a fixed result and dies by signal
    /// on anything else.
    const WORKER: &str = r#"
input=$(cat)
case "$input" in
  *'"key":"A"'*) printf '%s' '{"key":"A","file_hashes":{"/x":"11"},"dir_hash":"22","success":true}' ;;
  *) kill -9 $$ ;;
esac
"#;

    fn sh_converter(fx: &Fixture) -> Converter<SubprocessExecutor> {
        let exec = SubprocessExecutor::new("sh", vec!["-c".into(), WORKER.into()]);
        Converter::new(fx.options(), exec).with_cancel_flag(&NEVER)
    }

    #[test]
    fn results_cross_the_process_boundary() {
        let fx = three_entry_fixture();
        let summary = sh_converter(&fx).run().unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 2);
        let store = MemoStore::open_read_only(&fx.out().join("processed_files.db"))
            .unwrap()
            .unwrap();
        let rec = store.get("A").unwrap().unwrap();
        assert_eq!(rec.dir_hash.as_str(), "22");
        assert_eq!(rec.file_hashes["/x"].as_str(), "11");
    }

    #[test]
    fn crashed_worker_fails_only_its_entry() {
        let fx = three_entry_fixture();
        let summary = sh_converter(&fx).run().unwrap();

        let mut failed: Vec<_> = summary.failures.iter().map(|(k, _)| k.as_str()).collect();
        failed.sort();
        assert_eq!(failed, vec!["B", "C"]);
        assert!(summary.failures.iter().all(|(_, e)| e.contains("exited")));
        assert_eq!(fx.stored_keys(), vec!["A"]);
    }
}
