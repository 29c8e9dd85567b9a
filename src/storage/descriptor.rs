//! Connection descriptor parsing
//!
//! The backend is chosen once, from the scheme of the configured database URL.

use crate::error::{Error, Result};
use percent_encoding::percent_decode_str;
use std::fmt;
use std::path::PathBuf;
use url::Url;

/// The storage backends a store can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Local JSON file (no database URL configured)
    LocalFile,
    Postgres,
    MySql,
    MongoDb,
    /// JSON file at a path taken from a `file://` URL
    RemoteFile,
    Http,
}

impl BackendKind {
    /// Map a URL scheme onto a backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedScheme`] for anything not listed here.
    pub fn from_scheme(scheme: &str) -> Result<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(BackendKind::Postgres),
            "mysql" => Ok(BackendKind::MySql),
            "mongodb" | "mongodb+srv" => Ok(BackendKind::MongoDb),
            "file" => Ok(BackendKind::RemoteFile),
            "http" | "https" => Ok(BackendKind::Http),
            other => Err(Error::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::LocalFile => "local-file",
            BackendKind::Postgres => "postgres",
            BackendKind::MySql => "mysql",
            BackendKind::MongoDb => "mongodb",
            BackendKind::RemoteFile => "remote-file",
            BackendKind::Http => "http",
        }
    }

    /// Whether this is one of the external (URL-selected) backends.
    pub fn is_external(&self) -> bool {
        !matches!(self, BackendKind::LocalFile)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed database URL.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub kind: BackendKind,
    raw: String,
    url: Url,
}

impl Descriptor {
    /// Parse a database URL and classify its backend.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the string is not a URL,
    /// [`Error::UnsupportedScheme`] if the scheme is unknown.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let url = Url::parse(raw)
            .map_err(|e| Error::Config(format!("Invalid database URL: {e}")))?;
        let kind = BackendKind::from_scheme(url.scheme())?;
        Ok(Self {
            kind,
            raw: raw.to_string(),
            url,
        })
    }

    /// The URL exactly as configured (including credentials).
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// URL safe for logs: the password is masked.
    pub fn redacted(&self) -> String {
        let mut url = self.url.clone();
        if url.password().is_some() {
            let _ = url.set_password(Some("***"));
        }
        url.to_string()
    }

    /// Filesystem path named by a `file://` URL, percent-decoded.
    ///
    /// `file:///srv/bot/settings.json` is absolute, `file://data/settings.json`
    /// is relative to the working directory.
    pub fn file_path(&self) -> Result<PathBuf> {
        let rest = strip_prefix_ignore_case(&self.raw, "file://")
            .or_else(|| strip_prefix_ignore_case(&self.raw, "file:"))
            .ok_or_else(|| Error::Config(format!("Not a file URL: {}", self.raw)))?;
        if rest.is_empty() {
            return Err(Error::Config("File URL has no path".into()));
        }
        if rest.starts_with('/') {
            if let Ok(path) = self.url.to_file_path() {
                return Ok(path);
            }
        }

        // `url` reads the first segment of a relative path as a host name.
        let decoded = percent_decode_str(rest)
            .decode_utf8()
            .map_err(|e| Error::Config(format!("File URL path is not UTF-8: {e}")))?;
        Ok(PathBuf::from(decoded.as_ref()))
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}
