//! Error types for gcman

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for gcman operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for gcman
#[derive(Error, Debug)]
pub enum Error {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory '{path}': {source}")]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Failed to serialize data: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A stored document could not be parsed.
    #[error("Stored settings at '{path}' could not be parsed: {reason}")]
    Malformed { path: PathBuf, reason: String },

    /// A malformed settings file was preserved and the load was abandoned.
    ///
    /// The original file is left in place and a copy is kept at `backup`.
    #[error("Settings file '{path}' is corrupt (copy preserved at '{backup}'): {reason}")]
    Corrupt {
        path: PathBuf,
        backup: PathBuf,
        reason: String,
    },

    /// An external backend holds a document that could not be parsed.
    ///
    /// `raw` is the document as fetched, so it can be preserved before
    /// anything overwrites it.
    #[error("{backend} backend holds a malformed settings document: {reason}")]
    MalformedDocument {
        backend: &'static str,
        raw: String,
        reason: String,
    },

    // -------------------------------------------------------------------------
    // Backend Errors
    // -------------------------------------------------------------------------
    #[error("{backend} backend error: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },

    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP endpoint returned status {status}")]
    HttpStatus { status: u16 },

    #[error("Save failed: {0}")]
    SaveFailed(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported database URL scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("Backend '{0}' is not compiled in (enable the `{0}` feature)")]
    BackendDisabled(&'static str),

    #[error("Store has been shut down")]
    ShutDown,

    /// Saving before the first load would replace stored data with an
    /// empty state.
    #[error("Settings have not been loaded yet; refusing to overwrite stored data")]
    NotLoaded,

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub(crate) fn backend(backend: &'static str, err: impl std::fmt::Display) -> Self {
        Error::Backend {
            backend,
            message: err.to_string(),
        }
    }

    /// Errors that only mean "try again later": network, database or disk trouble.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Error::FileRead { .. }
            | Error::FileWrite { .. }
            | Error::DirectoryCreate { .. }
            | Error::Backend { .. }
            | Error::HttpStatus { .. }
            | Error::SaveFailed(_) => true,
            #[cfg(feature = "http")]
            Error::Http(_) => true,
            _ => false,
        }
    }

    /// Errors that must interrupt the caller instead of being logged and swallowed.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::UnsupportedScheme(_)
                | Error::BackendDisabled(_)
                | Error::InvalidArgument(_)
                | Error::NotLoaded
        )
    }

    /// Stored data that could not be parsed, whether or not a copy was kept.
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            Error::Malformed { .. }
                | Error::Corrupt { .. }
                | Error::MalformedDocument { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::UnsupportedScheme("ftp".into()).is_fatal());
        assert!(Error::InvalidArgument("x".into()).is_fatal());
        assert!(!Error::HttpStatus { status: 500 }.is_fatal());
        assert!(Error::HttpStatus { status: 500 }.is_transient());
        assert!(Error::backend("postgres", "connection refused").is_transient());

        let corrupt = Error::Corrupt {
            path: "a.json".into(),
            backup: "a.json.corrupt".into(),
            reason: "eof".into(),
        };
        assert!(!corrupt.is_transient());
        assert!(!corrupt.is_fatal());
        assert!(corrupt.is_corrupt());

        let document = Error::MalformedDocument {
            backend: "http",
            raw: "{}".into(),
            reason: "invalid type".into(),
        };
        assert!(!document.is_transient());
        assert!(document.is_corrupt());
        assert!(!document.to_string().contains("{}"));

        assert!(Error::NotLoaded.is_fatal());
        assert!(!Error::NotLoaded.is_transient());
    }
}
