//! Errors that fail a single entry without failing the run

use std::path::PathBuf;

use crate::extract::ExtractError;

/// Why one entry could not be converted.
///
/// These never abort a run: the dispatcher records the entry as failed,
/// leaves its previous store record untouched, and moves on.
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("entry has no identifier")]
    MissingKey,
    #[error("identifier {0:?} cannot be used as a directory name")]
    InvalidKey(String),
    #[error("no attachment could be resolved")]
    NoAttachments,
    #[error("extraction failed for {}: {source}", .path.display())]
    Extraction {
        path: PathBuf,
        #[source]
        source: ExtractError,
    },
    #[error("cannot read text attachment {}: {source}", .path.display())]
    UnreadableText {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("worker process failed: {0}")]
    Worker(String),
    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl EntryError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_display_includes_context() {
        let err = EntryError::io(
            "create workspace",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.starts_with("create workspace: "));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn extraction_display_names_file() {
        let err = EntryError::Extraction {
            path: PathBuf::from("/papers/a.pdf"),
            source: ExtractError::EmptyCommand,
        };
        assert!(err.to_string().contains("/papers/a.pdf"));
    }
}
