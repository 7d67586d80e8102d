//! Bibliography entries as handed to the converter

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EntryError;

/// Field holding the `;`-separated attachment references.
pub const FILE_FIELD: &str = "file";

/// One bibliography record. Field names are lowercase; the converter only
/// looks at `key` and the `file` field, everything else is carried along.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub entry_type: String,
    pub fields: BTreeMap<String, String>,
}

impl Entry {
    pub fn new(key: impl Into<String>, entry_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            entry_type: entry_type.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields.insert(name.to_lowercase(), value.into());
        self
    }

    /// Raw attachment reference string; empty when the field is absent.
    pub fn file_field(&self) -> &str {
        self.fields.get(FILE_FIELD).map(String::as_str).unwrap_or("")
    }
}

/// Check that `key` can name exactly one directory directly under the
/// output root.
pub fn validate_key(key: &str) -> Result<(), EntryError> {
    if key.trim().is_empty() {
        return Err(EntryError::MissingKey);
    }
    let unusable = key == "."
        || key == ".."
        || key.contains(['/', '\\', '\0'])
        || key.starts_with('.');
    if unusable {
        return Err(EntryError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_field_defaults_to_empty() {
        let e = Entry::new("Cook2023", "article");
        assert_eq!(e.file_field(), "");
    }

    #[test]
    fn with_field_lowercases_name() {
        let e = Entry::new("Cook2023", "article").with_field("FILE", "a.pdf");
        assert_eq!(e.file_field(), "a.pdf");
    }

    #[test]
    fn plain_keys_are_valid() {
        assert!(validate_key("Aitken2022").is_ok());
        assert!(validate_key("doe:2020-x_1").is_ok());
    }

    #[test]
    fn empty_key_is_missing() {
        assert!(matches!(validate_key(""), Err(EntryError::MissingKey)));
        assert!(matches!(validate_key("  "), Err(EntryError::MissingKey)));
    }

    #[test]
    fn path_like_keys_are_rejected() {
        for key in ["..", ".", "a/b", "a\\b", ".hidden"] {
            assert!(
                matches!(validate_key(key), Err(EntryError::InvalidKey(_))),
                "{key} should be rejected"
            );
        }
    }
}
