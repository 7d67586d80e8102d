//! Document extraction: one source attachment → markdown text
//!
//! The converter treats extraction as untrusted third-party work. In the
//! CLI it only ever runs inside a worker process.

use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

/// Default PDF command: plain text layout on stdout.
pub const DEFAULT_PDF_COMMAND: &[&str] = &["pdftotext", "-layout", "{input}", "-"];

const INPUT_PLACEHOLDER: &str = "{input}";
const OUTPUT_DIR_PLACEHOLDER: &str = "{output_dir}";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("extraction command is empty")]
    EmptyCommand,
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("{program} produced output that is not UTF-8")]
    NotUtf8 { program: String },
}

/// Turns one source document into markdown.
///
/// Implementations may write extracted images into `output_dir`; they must
/// not write anywhere else.
pub trait Extractor: Send + Sync {
    fn extract(&self, source: &Path, output_dir: &Path) -> Result<String, ExtractError>;
}

/// Runs an external program and takes its stdout as the markdown text.
///
/// `argv` is a template: `{input}` is replaced by the absolute source path
/// and `{output_dir}` by the workspace directory, which is also the working
/// directory of the child.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    argv: Vec<String>,
}

impl CommandExtractor {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    fn render(&self, source: &Path, output_dir: &Path) -> Vec<OsString> {
        let input = source.to_string_lossy();
        let output = output_dir.to_string_lossy();
        self.argv
            .iter()
            .map(|arg| {
                if arg == INPUT_PLACEHOLDER {
                    source.as_os_str().to_os_string()
                } else if arg == OUTPUT_DIR_PLACEHOLDER {
                    output_dir.as_os_str().to_os_string()
                } else {
                    arg.replace(INPUT_PLACEHOLDER, &input)
                        .replace(OUTPUT_DIR_PLACEHOLDER, &output)
                        .into()
                }
            })
            .collect()
    }
}

impl Default for CommandExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_PDF_COMMAND.iter().map(|s| s.to_string()).collect())
    }
}

impl Extractor for CommandExtractor {
    fn extract(&self, source: &Path, output_dir: &Path) -> Result<String, ExtractError> {
        let mut args = self.render(source, output_dir).into_iter();
        let program = args.next().ok_or(ExtractError::EmptyCommand)?;
        let program_name = program.to_string_lossy().into_owned();

        log::debug!("running {program_name} on {}", source.display());
        let output = Command::new(&program)
            .args(args)
            .current_dir(output_dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ExtractError::Spawn {
                program: program_name.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExtractError::Failed {
                program: program_name,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        String::from_utf8(output.stdout).map_err(|_| ExtractError::NotUtf8 {
            program: program_name,
        })
    }
}
