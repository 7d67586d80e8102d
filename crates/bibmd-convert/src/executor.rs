//! Executors run one work unit and always hand back a result
//!
//! `SubprocessExecutor` gives every unit its own worker process, so a
//! crash in the extraction tool takes down only that unit. The in-process
//! executor contains panics instead and is what tests and embedders use.

use std::any::Any;
use std::ffi::OsString;
use std::io::{ErrorKind, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::error::EntryError;
use crate::extract::Extractor;
use crate::worker::{ProcessingResult, WorkUnit, process};

/// Runs work units for the dispatch pool. Called concurrently from pool
/// threads; failures come back as failed results, never as panics.
pub trait Executor: Sync {
    fn execute(&self, unit: &WorkUnit) -> ProcessingResult;
}

/// Converts on the calling thread with a fixed extractor. The unit's
/// `pdf_command` is ignored.
pub struct InProcessExecutor<E> {
    extractor: E,
}

impl<E: Extractor> InProcessExecutor<E> {
    pub fn new(extractor: E) -> Self {
        Self { extractor }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<E: Extractor> Executor for InProcessExecutor<E> {
    fn execute(&self, unit: &WorkUnit) -> ProcessingResult {
        match panic::catch_unwind(AssertUnwindSafe(|| process(unit, &self.extractor))) {
            Ok(result) => result,
            Err(payload) => {
                let err = EntryError::Panicked(panic_message(payload.as_ref()));
                log::error!("{}: {err}", unit.entry.key);
                ProcessingResult::failed(unit.entry.key.clone(), err)
            }
        }
    }
}

/// Spawns `program args...` per unit, writes the unit as JSON to its stdin
/// and reads one result as JSON from its stdout. Stderr is inherited so
/// worker log lines reach the terminal.
#[derive(Debug, Clone)]
pub struct SubprocessExecutor {
    program: PathBuf,
    args: Vec<OsString>,
}

impl SubprocessExecutor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// The running binary's own `worker` subcommand.
    pub fn current_exe_worker() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, vec!["worker".into()]))
    }

    /// Extra arguments passed after the configured ones.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn run(&self, unit: &WorkUnit) -> Result<ProcessingResult, EntryError> {
        let key = &unit.entry.key;
        let payload = serde_json::to_vec(unit)
            .map_err(|e| EntryError::Worker(format!("cannot encode work unit: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                EntryError::Worker(format!("cannot start {}: {e}", self.program.display()))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A worker that dies early closes its end first; its exit
            // status below says why.
            if let Err(e) = stdin.write_all(&payload) {
                if e.kind() == ErrorKind::BrokenPipe {
                    log::debug!("{key}: worker closed stdin early");
                } else {
                    log::warn!("{key}: failed to send work unit: {e}");
                }
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| EntryError::Worker(format!("failed waiting for worker: {e}")))?;
        if !output.status.success() {
            return Err(EntryError::Worker(format!("worker exited with {}", output.status)));
        }

        let result: ProcessingResult = serde_json::from_slice(&output.stdout)
            .map_err(|e| EntryError::Worker(format!("unreadable worker result: {e}")))?;
        if result.key != *key {
            return Err(EntryError::Worker(format!(
                "worker answered for {:?} instead",
                result.key
            )));
        }
        Ok(result)
    }
}

impl Executor for SubprocessExecutor {
    fn execute(&self, unit: &WorkUnit) -> ProcessingResult {
        self.run(unit).unwrap_or_else(|err| {
            log::error!("{}: {err}", unit.entry.key);
            ProcessingResult::failed(unit.entry.key.clone(), err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;
    use crate::extract::ExtractError;
    use std::path::Path;

    struct Panicky;

    impl Extractor for Panicky {
        fn extract(&self, _source: &Path, _output_dir: &Path) -> Result<String, ExtractError> {
            panic!("extractor blew up")
        }
    }

    fn pdf_unit(dir: &Path) -> WorkUnit {
        std::fs::write(dir.join("a.pdf"), b"%PDF").unwrap();
        WorkUnit {
            entry: Entry::new("K", "misc").with_field("file", "a.pdf"),
            output_root: dir.join("out"),
            base_dir: dir.to_path_buf(),
            pdf_command: vec![],
        }
    }

    #[test]
    fn in_process_contains_panics() {
        let dir = tempfile::tempdir().unwrap();
        let result = InProcessExecutor::new(Panicky).execute(&pdf_unit(dir.path()));
        assert!(!result.success);
        assert!(result.error.unwrap().contains("extractor blew up"));
    }

    #[test]
    fn panic_message_variants() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }

    #[cfg(unix)]
    #[test]
    fn subprocess_missing_program_fails_unit() {
        let dir = tempfile::tempdir().unwrap();
        let exec = SubprocessExecutor::new("/nonexistent/bibmd-worker", vec![]);
        let result = exec.execute(&pdf_unit(dir.path()));
        assert!(!result.success);
        assert!(result.error.unwrap().contains("cannot start"));
    }

    #[cfg(unix)]
    #[test]
    fn subprocess_nonzero_exit_fails_unit() {
        let dir = tempfile::tempdir().unwrap();
        let exec = SubprocessExecutor::new("sh", vec!["-c".into(), "cat >/dev/null; exit 7".into()]);
        let result = exec.execute(&pdf_unit(dir.path()));
        assert!(!result.success);
        assert!(result.error.unwrap().contains("exited"));
    }

    #[cfg(unix)]
    #[test]
    fn subprocess_wrong_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let reply = r#"{"key":"Other","file_hashes":{},"dir_hash":"","success":true}"#;
        let script = format!("cat >/dev/null; printf '%s' '{reply}'");
        let exec = SubprocessExecutor::new("sh", vec!["-c".into(), script.into()]);
        let result = exec.execute(&pdf_unit(dir.path()));
        assert!(!result.success);
        assert_eq!(result.key, "K");
    }
}
