//! Error type shared by the whole pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::lexer::Language;

/// Errors that abort a pipeline stage.
///
/// Per-item problems (an undecodable line, a commit without a message) are
/// logged and skipped instead of surfacing here.
#[derive(Error, Debug)]
pub enum Error {
    #[error("commit store path does not exist: {}", .0.display())]
    MissingStore(PathBuf),

    #[error("preprocessed corpus does not exist: {}", .0.display())]
    MissingCorpus(PathBuf),

    #[error("unsupported language '{0}', expected one of: python, cpp, java, javascript")]
    UnsupportedLanguage(String),

    #[error("malformed diff at line {line}: {reason}")]
    MalformedDiff { line: usize, reason: String },

    #[error("git patch error: {0}")]
    Git(#[from] git2::Error),

    #[error("{language} grammar error: {reason}")]
    Grammar { language: Language, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("worker pool error: {0}")]
    Pool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
