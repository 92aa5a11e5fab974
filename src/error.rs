use std::path::PathBuf;

use thiserror::Error;

use crate::model::NodeKind;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Error type covering branch resolution, branch creation, reconciliation and
/// the workbook plumbing around them.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Wrapper for IO failures such as reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when JSON parsing or serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Raised when a TOML run configuration cannot be parsed.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Errors bubbled up from the Excel writer implementation.
    #[error("Excel write error: {0}")]
    ExcelWrite(#[from] rust_xlsxwriter::XlsxError),

    /// Errors bubbled up from the Excel reader implementation.
    #[error("Excel read error: {0}")]
    ExcelRead(#[from] calamine::XlsxError),

    /// Raised when a sheet does not follow the expected conventions.
    #[error("invalid workbook structure: {0}")]
    InvalidWorkbook(String),

    /// Invalid caller options. Raised before any data is touched.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A lookup table has no entry for a required key.
    #[error("no entry for '{key}' in {table}")]
    Lookup { table: String, key: String },

    /// No rows were found for a variable on a branch in the given year.
    #[error("no values found for variable '{variable}' on branch '{path}' in {year}")]
    MissingData {
        path: String,
        variable: String,
        year: String,
    },

    /// An existence check or creation call failed, or the requested kind
    /// cannot be created through the external hierarchy.
    #[error("{message} (path: '{path}', kind: {kind:?})")]
    ExternalOperation {
        path: String,
        kind: Option<NodeKind>,
        message: String,
    },

    /// A missing segment was reached without a concrete parent to create it
    /// under.
    #[error("cannot create '{path}' without an existing parent; root branches must already exist")]
    OrphanCreation { path: String },

    /// Raised when the user provides a path that does not exist.
    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    /// Raised when the tracing subscriber fails to initialise.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

impl ToolError {
    pub(crate) fn external(
        path: impl Into<String>,
        kind: Option<NodeKind>,
        message: impl Into<String>,
    ) -> Self {
        ToolError::ExternalOperation {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn lookup(table: impl Into<String>, key: impl Into<String>) -> Self {
        ToolError::Lookup {
            table: table.into(),
            key: key.into(),
        }
    }
}
