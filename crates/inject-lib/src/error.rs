//! Error types for the injection pipeline

use std::path::PathBuf;

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that abort a transform run.
///
/// Unsupported resource kinds and eligibility skips are not errors; they
/// are recorded on the [`InjectionReport`](crate::InjectionReport).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A source could not be opened, statted or read
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Document framing or decoding failed
    #[error("failed to parse {source_name}{}: {message}", .line.map(|l| format!(" at line {l}")).unwrap_or_default())]
    Parse {
        source_name: String,
        line: Option<usize>,
        message: String,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The resolved configuration is internally inconsistent
    #[error("invalid proxy configuration: {0}")]
    ConfigValidation(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(source_name: &str, line: Option<usize>, message: impl Into<String>) -> Self {
        Error::Parse {
            source_name: source_name.to_string(),
            line,
            message: message.into(),
        }
    }
}
