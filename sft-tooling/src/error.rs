use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolingError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid trajectory at line {line}: {message}")]
    InvalidTrajectory { line: usize, message: String },

    #[error(
        "Could not locate config for domain={domain:?} example={example:?}. Checked {} and {}.",
        primary.display(),
        fallback.display()
    )]
    ConfigNotFound {
        domain: String,
        example: String,
        primary: PathBuf,
        fallback: PathBuf,
    },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("VM control server error: {0}")]
    Vm(String),

    #[error("Evaluator is not configured")]
    EvaluatorUnavailable,

    #[error("Evaluator failed: {0}")]
    Evaluator(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl ToolingError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ToolingError>;
