//! Textual scan for include directives and reflected-type markers.
//!
//! This is not a preprocessor: directives inside comments, string literals or
//! disabled conditional blocks are reported like any other.

use std::path::Path;

use kiln_config::BackslashPolicy;
use regex::Regex;

use crate::error::ScanError;

/// Kind of a source file, decided by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// C translation unit (`.c`).
    C,
    /// C++ translation unit (`.cpp`, `.cc`, `.cxx`, `.c++`).
    Cpp,
    /// Header (`.h`, `.hpp`, `.hh`, `.hxx`, `.inl`, `.inc`).
    Header,
    /// Objective-C translation unit (`.m`).
    ObjC,
    /// Objective-C++ translation unit (`.mm`).
    ObjCpp,
    /// Anything else.
    Other,
}

impl SourceKind {
    /// Classifies a path by its extension, ignoring case.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("c") => SourceKind::C,
            Some("cpp" | "cc" | "cxx" | "c++") => SourceKind::Cpp,
            Some("h" | "hpp" | "hh" | "hxx" | "inl" | "inc") => SourceKind::Header,
            Some("m") => SourceKind::ObjC,
            Some("mm") => SourceKind::ObjCpp,
            _ => SourceKind::Other,
        }
    }

    /// Whether `#import` directives are honoured.
    pub fn allows_import(self) -> bool {
        matches!(self, SourceKind::ObjC | SourceKind::ObjCpp)
    }

    /// Whether the file is compiled on its own.
    pub fn is_compilable(self) -> bool {
        matches!(
            self,
            SourceKind::C | SourceKind::Cpp | SourceKind::ObjC | SourceKind::ObjCpp
        )
    }
}

/// Result of scanning one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Directive payloads in source order, separators normalized to `/`.
    pub directives: Vec<String>,
    /// Whether a reflected-type marker was seen.
    pub reflected: bool,
}

/// Compiled directive and marker patterns.
pub struct DirectiveExtractor {
    directive: Regex,
    marker: Option<Regex>,
    chunk_size: usize,
}

impl DirectiveExtractor {
    /// Builds an extractor recognizing the given marker macro names.
    ///
    /// Inputs longer than `chunk_size` bytes are scanned in line-aligned chunks.
    pub fn new(markers: &[String], chunk_size: usize) -> Result<Self, ScanError> {
        let directive = Regex::new(r#"(?m)^[ \t]*#[ \t]*(include|import)[ \t]*[<"]([^">\r\n]*)[">]"#)
            .map_err(|e| ScanError::Pattern {
                reason: e.to_string(),
            })?;

        let marker = if markers.is_empty() {
            None
        } else {
            let alternatives: Vec<String> = markers.iter().map(|m| regex::escape(m)).collect();
            let pattern = format!(r"(?m)^[ \t]*(?:{})[ \t]*\(", alternatives.join("|"));
            Some(Regex::new(&pattern).map_err(|e| ScanError::Pattern {
                reason: e.to_string(),
            })?)
        };

        Ok(Self {
            directive,
            marker,
            chunk_size: chunk_size.max(1),
        })
    }

    /// Scans `contents` of the file at `path`.
    ///
    /// Fails on the first directive whose payload contains a character that
    /// cannot appear in a path, or a `\` separator when `backslashes` is
    /// [`BackslashPolicy::Error`].
    pub fn extract(
        &self,
        path: &Path,
        contents: &str,
        kind: SourceKind,
        backslashes: BackslashPolicy,
    ) -> Result<Extraction, ScanError> {
        let mut extraction = Extraction::default();

        for chunk in line_chunks(contents, self.chunk_size) {
            for caps in self.directive.captures_iter(chunk) {
                if &caps[1] == "import" && !kind.allows_import() {
                    continue;
                }
                let token = &caps[2];
                if token.chars().any(is_invalid_path_char) {
                    return Err(ScanError::InvalidPathCharacter {
                        path: path.to_path_buf(),
                        token: token.to_string(),
                    });
                }
                if token.contains('\\') && backslashes == BackslashPolicy::Error {
                    return Err(ScanError::BackslashSeparator {
                        path: path.to_path_buf(),
                        token: token.to_string(),
                    });
                }
                extraction.directives.push(token.replace('\\', "/"));
            }

            if !extraction.reflected {
                if let Some(marker) = &self.marker {
                    extraction.reflected = marker.is_match(chunk);
                }
            }
        }

        Ok(extraction)
    }
}

fn is_invalid_path_char(c: char) -> bool {
    matches!(c, '<' | '>' | '"' | '|' | '?' | '*') || c.is_control()
}

/// Splits `contents` into pieces of roughly `chunk_size` bytes, each ending
/// just after a newline (except possibly the last).
fn line_chunks(contents: &str, chunk_size: usize) -> Vec<&str> {
    if contents.len() <= chunk_size {
        return vec![contents];
    }

    let bytes = contents.as_bytes();
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < bytes.len() {
        let limit = (start + chunk_size).min(bytes.len());
        let end = if limit == bytes.len() {
            limit
        } else if let Some(pos) = bytes[start..limit].iter().rposition(|&b| b == b'\n') {
            start + pos + 1
        } else {
            bytes[limit..]
                .iter()
                .position(|&b| b == b'\n')
                .map_or(bytes.len(), |pos| limit + pos + 1)
        };
        chunks.push(&contents[start..end]);
        start = end;
    }
    chunks
}
