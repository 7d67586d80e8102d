//! Minimal BibTeX reader
//!
//! Produces entries in file order with lowercase field names. Handles
//! `{...}` and `"..."` values with nested braces, `#` concatenation,
//! `@string` macros, and skips `@comment` / `@preamble` blocks. Text
//! outside an `@` block is ignored, as BibTeX does.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};

use crate::entry::Entry;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

/// Read and parse a bibliography file.
pub fn load(path: &Path) -> Result<Vec<Entry>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read bibliography {}", path.display()))?;
    let entries =
        parse(&text).with_context(|| format!("failed to parse bibliography {}", path.display()))?;
    log::debug!("{}: {} entries", path.display(), entries.len());
    Ok(entries)
}

/// Parse BibTeX source text into entries, in source order.
pub fn parse(input: &str) -> Result<Vec<Entry>, ParseError> {
    Parser::new(input).entries()
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    macros: HashMap<String, String>,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            line: 1,
            macros: HashMap::new(),
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, ParseError> {
        Err(ParseError {
            line: self.line,
            message: message.into(),
        })
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect(&mut self, want: char) -> Result<(), ParseError> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => self.error(format!("expected '{want}', found '{c}'")),
            None => self.error(format!("expected '{want}', found end of input")),
        }
    }

    fn ident(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '.' | '+' | '/') {
                out.push(c);
                self.bump();
            } else {
                break;
            }
        }
        out
    }

    fn entries(mut self) -> Result<Vec<Entry>, ParseError> {
        let mut entries = Vec::new();
        loop {
            // Everything up to the next '@' is commentary
            while let Some(c) = self.peek() {
                if c == '@' {
                    break;
                }
                self.bump();
            }
            if self.bump().is_none() {
                return Ok(entries);
            }

            let at_line = self.line;
            self.skip_ws();
            let kind = self.ident().to_lowercase();
            self.skip_ws();
            let close = match self.peek() {
                Some('{') if !kind.is_empty() => '}',
                Some('(') if !kind.is_empty() => ')',
                _ => {
                    // A stray '@' in commentary, e.g. an email address
                    log::debug!("line {at_line}: ignoring '@' outside an entry");
                    continue;
                }
            };
            self.bump();

            match kind.as_str() {
                "comment" | "preamble" => self.skip_block(close)?,
                "string" => {
                    self.skip_ws();
                    let name = self.ident().to_lowercase();
                    self.expect('=')?;
                    let value = self.value()?;
                    self.expect(close)?;
                    self.macros.insert(name, value);
                }
                _ => entries.push(self.entry(kind, close)?),
            }
        }
    }

    /// Skip to the matching `close`, honouring nested braces.
    fn skip_block(&mut self, close: char) -> Result<(), ParseError> {
        let mut depth = 0usize;
        while let Some(c) = self.bump() {
            match c {
                '{' => depth += 1,
                '}' if depth > 0 => depth -= 1,
                c if c == close && depth == 0 => return Ok(()),
                _ => {}
            }
        }
        self.error("unterminated block")
    }

    fn entry(&mut self, kind: String, close: char) -> Result<Entry, ParseError> {
        let start_line = self.line;
        self.skip_ws();
        let mut key = String::new();
        while let Some(c) = self.peek() {
            if c == ',' || c == close {
                break;
            }
            key.push(c);
            self.bump();
        }
        let mut entry = Entry::new(key.trim(), kind);

        loop {
            self.skip_ws();
            match self.bump() {
                Some(c) if c == close => return Ok(entry),
                Some(',') => {}
                Some(c) => return self.error(format!("expected ',' or '{close}', found '{c}'")),
                None => {
                    return Err(ParseError {
                        line: start_line,
                        message: format!("entry {:?} is not terminated", entry.key),
                    });
                }
            }
            self.skip_ws();
            if self.peek() == Some(close) {
                // Trailing comma
                continue;
            }
            let name = self.ident().to_lowercase();
            if name.is_empty() {
                return self.error(format!("expected field name in entry {:?}", entry.key));
            }
            self.expect('=')?;
            let value = self.value()?;
            entry.fields.insert(name, value);
        }
    }

    /// `part ('#' part)*`
    fn value(&mut self) -> Result<String, ParseError> {
        let mut out = self.value_part()?;
        loop {
            self.skip_ws();
            if self.peek() != Some('#') {
                return Ok(out);
            }
            self.bump();
            out.push_str(&self.value_part()?);
        }
    }

    fn value_part(&mut self) -> Result<String, ParseError> {
        self.skip_ws();
        match self.peek() {
            Some('{') => {
                self.bump();
                self.delimited('}')
            }
            Some('"') => {
                self.bump();
                self.delimited('"')
            }
            Some(c) if c.is_alphanumeric() => {
                let word = self.ident();
                if word.chars().all(|c| c.is_ascii_digit()) {
                    return Ok(word);
                }
                Ok(self
                    .macros
                    .get(&word.to_lowercase())
                    .cloned()
                    .unwrap_or(word))
            }
            Some(c) => self.error(format!("unexpected '{c}' in field value")),
            None => self.error("unexpected end of input in field value"),
        }
    }

    /// Text up to an unnested `end`; inner braces are kept verbatim.
    fn delimited(&mut self, end: char) -> Result<String, ParseError> {
        let start_line = self.line;
        let mut out = String::new();
        let mut depth = 0usize;
        while let Some(c) = self.bump() {
            match c {
                '{' => depth += 1,
                '}' if depth > 0 => depth -= 1,
                c if c == end && depth == 0 => return Ok(out.trim().to_string()),
                '}' => {
                    return self.error("unbalanced '}' in field value");
                }
                _ => {}
            }
            out.push(c);
        }
        Err(ParseError {
            line: start_line,
            message: "unterminated field value".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_braced_and_quoted_fields() {
        let src = r#"
@article{Aitken2022,
  title = {The {Bayesian} brain},
  author = "Aitken, F.",
  year = 2022,
  file = {Full Text:/papers/aitken.pdf},
}
"#;
        let entries = parse(src).unwrap();
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.key, "Aitken2022");
        assert_eq!(e.entry_type, "article");
        assert_eq!(e.fields["title"], "The {Bayesian} brain");
        assert_eq!(e.fields["author"], "Aitken, F.");
        assert_eq!(e.fields["year"], "2022");
        assert_eq!(e.file_field(), "Full Text:/papers/aitken.pdf");
    }

    #[test]
    fn keeps_source_order() {
        let src = "@book{B, title={b}}\n@misc{A, title={a}}\n@online{C,}";
        let keys: Vec<_> = parse(src).unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["B", "A", "C"]);
    }

    #[test]
    fn field_names_are_lowercased() {
        let entries = parse("@misc{K, FILE = {a.txt}, Title={T}}").unwrap();
        assert_eq!(entries[0].file_field(), "a.txt");
        assert!(entries[0].fields.contains_key("title"));
    }

    #[test]
    fn skips_comments_and_preamble() {
        let src = "% a comment\n@comment{ignored {nested} }\n@preamble{\"\\newcommand\"}\n@misc{K, title={t}}";
        let entries = parse(src).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "K");
    }

    #[test]
    fn stray_at_in_commentary_is_ignored() {
        let src = "% maintained by me@example.org\n@misc{K, file = {a.txt}}\nsee @ below\n";
        let entries = parse(src).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "K");
        assert_eq!(entries[0].file_field(), "a.txt");
    }

    #[test]
    fn parse_error_displays_line() {
        let err = parse("@misc{K,\n title = {t}\n").unwrap_err();
        assert_eq!(err.to_string(), format!("line 1: {}", err.message));
    }

    #[test]
    fn expands_string_macros_and_concatenation() {
        let src = "@string{dir = \"/papers\"}\n@misc{K, file = dir # {/k.pdf}}";
        let entries = parse(src).unwrap();
        assert_eq!(entries[0].file_field(), "/papers/k.pdf");
    }

    #[test]
    fn parenthesised_entries() {
        let entries = parse("@misc(K, title = {t})").unwrap();
        assert_eq!(entries[0].key, "K");
    }

    #[test]
    fn entry_without_key_is_kept_with_empty_key() {
        let entries = parse("@misc{, title = {t}}").unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].key.is_empty());
    }

    #[test]
    fn unterminated_entry_is_an_error() {
        let err = parse("@misc{K,\n title = {t}\n").unwrap_err();
        assert!(err.message.contains("not terminated"), "{err}");
    }

    #[test]
    fn unterminated_value_reports_its_line() {
        let err = parse("\n\n@misc{K, title = {open").unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("missing.bib")).is_err());
    }
}
