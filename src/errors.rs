//! Error kinds for the storage engine.
//!
//! Failures fall into two camps: ones the query facade is allowed to turn
//! into a plain `false`/`None` (capacity, duplicate/missing keys), and ones
//! that indicate a broken caller contract (wrong projection length, writing
//! past a page's capacity) which we surface as `Err` but never expect a
//! well-behaved caller to trigger.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("physical page is full")]
    PageFull,

    #[error("slot {0} is out of bounds for this page")]
    OffsetOutOfBounds(usize),

    #[error("page range has been filled to capacity")]
    PageRangeFilled,

    #[error("primary key {0} already exists")]
    DuplicateKey(i64),

    #[error("no record found for key {0}")]
    MissingKey(i64),

    #[error("a table named {0:?} already exists")]
    TableAlreadyExists(String),

    #[error("RID {0} has no page directory entry")]
    UnknownRid(i64),

    #[error("expected {expected} projected columns, got {actual}")]
    ProjectionLengthMismatch { expected: usize, actual: usize },

    #[error("column index {0} is out of range")]
    ColumnOutOfRange(usize),

    #[error("underlying page store failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize persisted metadata: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;
