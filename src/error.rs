//! Domain error type shared by the template store, the filler and the
//! record store.
//!
//! The server maps each variant onto an HTTP status (see [`crate::server`]);
//! the CLI simply prints it through `anyhow`.

use crate::xlsx::PackageError;

/// Errors produced by form operations.
#[derive(Debug, thiserror::Error)]
pub enum FormError {
    /// The referenced template does not exist in the upload directory.
    #[error("template not found: {0}")]
    NotFound(String),

    /// The template exists but cannot be filled (only `.xlsx` is supported).
    #[error("unsupported template format: {0} (only .xlsx supported for now)")]
    UnsupportedFormat(String),

    /// The request was missing fields or carried values of the wrong shape.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The template is not a readable spreadsheet package.
    #[error("invalid template {name}: {source}")]
    InvalidTemplate {
        name: String,
        #[source]
        source: PackageError,
    },

    /// Filesystem or database failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Downloading a signature image failed. The filler recovers from this
    /// locally; it never aborts a fill.
    #[error("failed to fetch {url}: {message}")]
    RemoteFetch { url: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<std::io::Error> for FormError {
    fn from(err: std::io::Error) -> Self {
        FormError::Storage(StorageError::Io(err))
    }
}

impl From<sqlx::Error> for FormError {
    fn from(err: sqlx::Error) -> Self {
        FormError::Storage(StorageError::Database(err))
    }
}

impl FormError {
    pub(crate) fn invalid_template(name: &str, source: PackageError) -> Self {
        FormError::InvalidTemplate {
            name: name.to_string(),
            source,
        }
    }
}
