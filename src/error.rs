use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::field::DataType;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed page: {0}")]
    MalformedPage(String),

    /// A single tuple needs more bytes than one page offers.
    #[error("tuple of {size} bytes does not fit a page of {capacity} bytes")]
    OversizedTuple { size: usize, capacity: usize },

    #[error("text attribute of {0} bytes exceeds the 255 byte limit")]
    TextTooLong(usize),

    #[error("cannot compare {left:?} with {right:?}")]
    TypeMismatch { left: DataType, right: DataType },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("invalid sort configuration: {0}")]
    InvalidConfig(String),

    #[error("sort cancelled")]
    Cancelled,

    #[error("invalid operator state: {0}")]
    InvalidState(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl ExecError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ExecError::Io {
            path: path.into(),
            source,
        }
    }
}
