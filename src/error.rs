//! Error types for the contract form generator

use thiserror::Error;

/// Result type alias for the contract form generator
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the contract form generator
#[derive(Error, Debug)]
pub enum Error {
    /// Upload request carried no usable file
    #[error("Missing input: {reason}")]
    MissingInput { reason: String },

    /// Uploaded spreadsheet could not be read or lacks a required column
    #[error("Spreadsheet error: {reason}")]
    Spreadsheet { reason: String },

    /// Template file is missing or unreadable
    #[error("Template not found: {path}")]
    TemplateNotFound { path: String },

    /// Template is not a form-bearing PDF
    #[error("Malformed template {path}: {reason}")]
    TemplateMalformed { path: String, reason: String },

    /// Generated document could not be persisted
    #[error("Failed to write {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    /// Archive could not be assembled
    #[error("Failed to write archive {path}: {reason}")]
    ArchiveWriteFailed { path: String, reason: String },

    /// Requested download escapes the output directory
    #[error("Path access denied: {path}")]
    PathAccessDenied { path: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Return a sanitized error message safe to send to clients.
    /// Internal details (paths, library errors) are omitted.
    /// Full details should be logged via tracing before calling this.
    pub fn client_message(&self) -> String {
        match self {
            Error::MissingInput { reason } => reason.clone(),
            Error::Spreadsheet { reason } => format!("Invalid spreadsheet: {}", reason),
            Error::TemplateNotFound { path } => {
                let name = std::path::Path::new(path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                format!("Template not found: {}", name)
            }
            Error::TemplateMalformed { .. } => "Template is not a fillable PDF".to_string(),
            Error::WriteFailed { .. } => "Failed to write generated document".to_string(),
            Error::ArchiveWriteFailed { .. } => "Failed to write archive".to_string(),
            Error::PathAccessDenied { .. } => "Access denied".to_string(),
            Error::Io(_) => "I/O error".to_string(),
            Error::Serialization(_) => "Serialization error".to_string(),
        }
    }

    /// HTTP status code used when this error reaches the request boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::MissingInput { .. } | Error::Spreadsheet { .. } => 400,
            Error::PathAccessDenied { .. } => 403,
            Error::TemplateNotFound { .. } => 404,
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => 404,
            _ => 500,
        }
    }
}
