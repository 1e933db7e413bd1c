//! Error types for sqlshift.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for sqlshift operations.
#[derive(Debug, Error)]
pub enum ShiftError {
    /// The rewrite rules could not process the statement.
    #[error("Translation error ({dialect}): {message}")]
    Translation { dialect: String, message: String },

    /// The statement uses a construct the target dialect cannot express.
    #[error("Unsupported construct for {dialect}: {construct}")]
    Unsupported { dialect: String, construct: String },

    /// The statement could not be tokenized.
    #[error("Malformed statement at position {position}: {message}")]
    Lex { position: usize, message: String },

    /// No plugin is registered under this dialect name.
    #[error("Unknown dialect: '{0}'. Expected: postgresql, mysql, mssql, or oracle")]
    UnknownDialect(String),

    /// A RETURNING descriptor from an earlier statement was never consumed.
    #[error("A RETURNING result for table '{table}' is still pending on this session")]
    ReturningPending { table: String },

    /// The target engine rejected the rewritten statement.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Which stage of the pipeline an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Translation,
    Execution,
}

impl ShiftError {
    /// Create a translation error for the given dialect.
    pub fn translation(dialect: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Translation {
            dialect: dialect.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported-construct error for the given dialect.
    pub fn unsupported(dialect: impl Into<String>, construct: impl Into<String>) -> Self {
        Self::Unsupported {
            dialect: dialect.into(),
            construct: construct.into(),
        }
    }

    /// Create a lexer error at the given byte position.
    pub fn lex(position: usize, message: impl Into<String>) -> Self {
        Self::Lex {
            position,
            message: message.into(),
        }
    }

    /// Classify the error for the translation error log.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Execution(_) | Self::Connection(_) => ErrorKind::Execution,
            _ => ErrorKind::Translation,
        }
    }
}

/// Result type alias for sqlshift operations.
pub type ShiftResult<T> = Result<T, ShiftError>;
