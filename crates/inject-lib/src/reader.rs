//! Input discovery
//!
//! Turns a path argument into the byte-stream sources the driver drains one
//! at a time. No YAML is looked at here.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Path argument meaning standard input
pub const STDIN_PATH: &str = "-";

/// One byte-stream source of manifests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    File(PathBuf),
}

impl InputSource {
    /// Human readable name used in errors and logs
    pub fn name(&self) -> String {
        match self {
            InputSource::Stdin => "<stdin>".to_string(),
            InputSource::File(path) => path.display().to_string(),
        }
    }

    /// Open the source for reading
    pub fn open(&self) -> Result<Box<dyn BufRead>> {
        match self {
            InputSource::Stdin => Ok(Box::new(io::stdin().lock())),
            InputSource::File(path) => {
                let file = File::open(path).map_err(|e| Error::io(path, e))?;
                Ok(Box::new(BufReader::new(file)))
            }
        }
    }
}

/// Resolve a path argument into sources.
///
/// `-` is standard input, a regular file is a single source and a
/// directory is walked depth-first with entries sorted by file name, so
/// the order is stable for a fixed tree.
pub fn read_sources(path: &str) -> Result<Vec<InputSource>> {
    if path == STDIN_PATH {
        return Ok(vec![InputSource::Stdin]);
    }

    let root = Path::new(path);
    let metadata = std::fs::metadata(root).map_err(|e| Error::io(root, e))?;
    if !metadata.is_dir() {
        return Ok(vec![InputSource::File(root.to_path_buf())]);
    }

    let mut sources = Vec::new();
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if entry.file_type().is_file() {
            sources.push(InputSource::File(entry.into_path()));
        }
    }

    debug!(path = %root.display(), count = sources.len(), "Discovered manifest files");
    Ok(sources)
}

fn walk_error(root: &Path, err: walkdir::Error) -> Error {
    let path = err.path().unwrap_or(root).to_path_buf();
    let message = err.to_string();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, message));
    Error::io(path, source)
}
