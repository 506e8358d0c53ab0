//! Multi-document YAML splitting
//!
//! Yields the raw bytes of each `---` separated document of a stream
//! without parsing them, so untouched documents can be written back
//! exactly as they were read.

use std::io::BufRead;

use crate::error::{Error, Result};

const SEPARATOR: &[u8] = b"---";

/// Lazy iterator over the documents of one source
pub struct DocumentSplitter<R> {
    reader: R,
    source_name: String,
    line: usize,
    start: usize,
    done: bool,
}

impl<R: BufRead> DocumentSplitter<R> {
    pub fn new(reader: R, source_name: impl Into<String>) -> Self {
        Self {
            reader,
            source_name: source_name.into(),
            line: 0,
            start: 1,
            done: false,
        }
    }

    /// Number of lines consumed so far
    pub fn line(&self) -> usize {
        self.line
    }

    /// First line of the most recently yielded document, 1-based
    pub fn document_start(&self) -> usize {
        self.start
    }

    fn next_document(&mut self) -> Result<Option<Vec<u8>>> {
        let mut document = Vec::new();
        self.start = self.line + 1;
        loop {
            let mut line = Vec::new();
            let read = self
                .reader
                .read_until(b'\n', &mut line)
                .map_err(|e| Error::io(&self.source_name, e))?;

            if read == 0 {
                self.done = true;
                return Ok((!is_blank(&document)).then_some(document));
            }

            self.line += 1;
            if std::str::from_utf8(&line).is_err() {
                return Err(Error::parse(
                    &self.source_name,
                    Some(self.line),
                    "document is not valid UTF-8",
                ));
            }

            let separator = match classify(&line) {
                LineKind::Content => false,
                LineKind::Separator => true,
                LineKind::Malformed => {
                    return Err(Error::parse(
                        &self.source_name,
                        Some(self.line),
                        "unexpected content after document separator",
                    ));
                }
            };

            if separator {
                if is_blank(&document) {
                    document.clear();
                    self.start = self.line + 1;
                    continue;
                }
                return Ok(Some(document));
            }

            document.extend_from_slice(&line);
        }
    }
}

impl<R: BufRead> Iterator for DocumentSplitter<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_document() {
            Ok(Some(document)) => Some(Ok(document)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

enum LineKind {
    Content,
    Separator,
    Malformed,
}

/// A separator is `---` at the start of a line, optionally followed by
/// whitespace and a `#` comment
fn classify(line: &[u8]) -> LineKind {
    let Some(rest) = line.strip_prefix(SEPARATOR) else {
        return LineKind::Content;
    };
    match rest.iter().position(|b| !b.is_ascii_whitespace()) {
        None => LineKind::Separator,
        Some(i) if i > 0 && rest[i] == b'#' => LineKind::Separator,
        Some(_) => LineKind::Malformed,
    }
}

/// Whether a document holds nothing but whitespace and comments
fn is_blank(document: &[u8]) -> bool {
    String::from_utf8_lossy(document).lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#')
    })
}
