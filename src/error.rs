use serde::Serialize;
use thiserror::Error;

use crate::types::ColumnType;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Could not detect a separator/quote combination that parses the sample consistently")]
    DialectUndetectable,
    #[error("Column '{column}' cannot be narrowed from {inferred} to {requested}")]
    InvalidOverride {
        column: String,
        inferred: ColumnType,
        requested: ColumnType,
    },
    #[error("Reading aborted by the output sink")]
    Aborted,
    #[error("Output allocation failed for {ncols} column(s) and {nrows} row(s)")]
    AllocationFailed { ncols: usize, nrows: usize },
    #[error("Malformed input at data row {row} (byte {offset}): {reason}")]
    Malformed {
        row: usize,
        offset: usize,
        reason: String,
    },
    #[error("{0}")]
    Warning(ReadWarning),
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
pub enum ReadWarning {
    /// Reading stopped at a ragged row; rows before it were kept.
    #[error(
        "Stopped early on data row {row} (byte {offset}). Expected {expected} field(s) but found {found}. Consider fill=true"
    )]
    StoppedEarly {
        row: usize,
        offset: usize,
        expected: usize,
        found: usize,
    },
    /// The header names more columns than the data has; the extras were ignored.
    #[error("Header has {names} name(s) but the data has {columns} column(s); extra names ignored")]
    ExtraHeaderNames { names: usize, columns: usize },
}

pub type ReadResult<T> = Result<T, ReadError>;
