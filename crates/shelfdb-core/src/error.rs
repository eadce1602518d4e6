//! Error types for all ShelfDB operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::api::predicate::Operator;
use crate::value::{Value, ValueKind};

/// Top-level error type for ShelfDB operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Query(#[from] QueryError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt table file {}: {reason}", path.display())]
    CorruptFile { path: PathBuf, reason: String },

    #[error("failed to encode table '{table}': {reason}")]
    Encode { table: String, reason: String },

    #[error("database directory is locked: {}", .0.display())]
    DirectoryLocked(PathBuf),

    /// `burn_it_all` stopped part way. `burned` were removed, `table` and
    /// every table after it in name order are intact.
    #[error("burn stopped at table '{table}' after removing {} table(s)", burned.len())]
    BurnIncomplete {
        burned: Vec<String>,
        table: String,
        #[source]
        source: Box<StorageError>,
    },
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("invalid table name '{0}': use 1-128 ASCII letters, digits, '_' or '-'")]
    InvalidTableName(String),

    #[error("id {id} already exists in table '{table}'")]
    IdCollision { table: String, id: Value },

    #[error("the id field of records in table '{0}' cannot be changed")]
    ImmutableId(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("validation failed for table '{table}': {reason}")]
    ValidationFailed { table: String, reason: String },
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unknown operator '{operator}' in query key '{key}'")]
    UnknownOperator { key: String, operator: String },

    #[error("operator '{operator}' expects {expected} operand, got {actual}")]
    InvalidOperand {
        operator: Operator,
        expected: &'static str,
        actual: ValueKind,
    },

    #[error("query key '{0}' has an empty field name")]
    EmptyField(String),

    #[error("no record in table '{0}' matches the query")]
    RecordNotFound(String),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// A predicate was applied to a field whose kind it cannot handle.
#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "cannot evaluate '{field}__{operator}': field is {field_kind}, operand is {operand_kind}"
)]
pub struct EvalError {
    pub field: String,
    pub operator: Operator,
    pub field_kind: ValueKind,
    pub operand_kind: ValueKind,
}

impl From<EvalError> for Error {
    fn from(err: EvalError) -> Self {
        Error::Query(QueryError::Eval(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
