//! Storage drivers
//!
//! Every backend implements [`StorageDriver`]: lazy idempotent
//! `initialize`, `load` returning `Ok(None)` when nothing is stored yet, and
//! `save` that either commits the whole snapshot or fails. [`Driver`] is the
//! closed set of backends, picked once from the database URL scheme.

mod descriptor;
mod file;

#[cfg(feature = "mongodb")]
mod document;
#[cfg(feature = "http")]
mod http;
#[cfg(any(feature = "postgres", feature = "mysql"))]
mod sql;

pub use descriptor::{BackendKind, Descriptor};
pub use file::{FileDriver, JsonCodec};
pub(crate) use file::{preserve_corrupt, preserve_corrupt_document};

#[cfg(feature = "mongodb")]
pub use document::DocumentDriver;
#[cfg(feature = "http")]
pub use http::HttpDriver;
#[cfg(any(feature = "postgres", feature = "mysql"))]
pub use sql::{SqlDialect, SqlDriver};

use crate::error::{Error, Result};
use crate::snapshot::Snapshot;
use std::future::Future;

/// Load/save contract shared by every backend
pub trait StorageDriver: Send + Sync {
    /// Short backend name for logs and errors
    fn name(&self) -> &'static str;

    /// Connect / create schema. Safe to call repeatedly; only the first
    /// successful call does any work.
    fn initialize(&self) -> impl Future<Output = Result<()>> + Send;

    /// Fetch the stored snapshot; `Ok(None)` when nothing is stored.
    fn load(&self) -> impl Future<Output = Result<Option<Snapshot>>> + Send;

    /// Persist the whole snapshot.
    fn save(&self, snapshot: &Snapshot) -> impl Future<Output = Result<()>> + Send;

    /// Release connections and pools.
    fn close(&self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// The backend a store runs on.
pub enum Driver {
    LocalFile(FileDriver),
    RemoteFile(FileDriver),
    #[cfg(any(feature = "postgres", feature = "mysql"))]
    Sql(SqlDriver),
    #[cfg(feature = "mongodb")]
    Document(DocumentDriver),
    #[cfg(feature = "http")]
    Http(HttpDriver),
}

impl Driver {
    /// Build the driver named by a parsed database URL.
    ///
    /// # Errors
    ///
    /// [`Error::BackendDisabled`](crate::Error::BackendDisabled) when the
    /// backend's cargo feature is off; [`Error::Config`](crate::Error::Config)
    /// for an unusable `file://` URL.
    pub fn from_descriptor(descriptor: &Descriptor, codec: JsonCodec) -> Result<Self> {
        match descriptor.kind {
            BackendKind::LocalFile | BackendKind::RemoteFile => Ok(Driver::RemoteFile(
                FileDriver::remote(descriptor.file_path()?, codec),
            )),
            #[cfg(feature = "postgres")]
            BackendKind::Postgres => Ok(Driver::Sql(SqlDriver::new(
                SqlDialect::Postgres,
                descriptor.as_str(),
            )?)),
            #[cfg(feature = "mysql")]
            BackendKind::MySql => Ok(Driver::Sql(SqlDriver::new(
                SqlDialect::MySql,
                descriptor.as_str(),
            )?)),
            #[cfg(feature = "mongodb")]
            BackendKind::MongoDb => Ok(Driver::Document(DocumentDriver::new(descriptor.as_str()))),
            #[cfg(feature = "http")]
            BackendKind::Http => Ok(Driver::Http(HttpDriver::new(descriptor.url()))),
            #[allow(unreachable_patterns)]
            other => Err(Error::BackendDisabled(other.name())),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Driver::LocalFile(_) => BackendKind::LocalFile,
            Driver::RemoteFile(_) => BackendKind::RemoteFile,
            #[cfg(any(feature = "postgres", feature = "mysql"))]
            Driver::Sql(d) => match d.dialect() {
                SqlDialect::Postgres => BackendKind::Postgres,
                SqlDialect::MySql => BackendKind::MySql,
            },
            #[cfg(feature = "mongodb")]
            Driver::Document(_) => BackendKind::MongoDb,
            #[cfg(feature = "http")]
            Driver::Http(_) => BackendKind::Http,
        }
    }

    /// The file behind a file-based driver, used for corruption backups.
    pub(crate) fn file_path(&self) -> Option<&std::path::Path> {
        match self {
            Driver::LocalFile(d) | Driver::RemoteFile(d) => Some(d.path()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }
}

macro_rules! dispatch {
    ($self:ident, $driver:ident => $call:expr) => {
        match $self {
            Driver::LocalFile($driver) | Driver::RemoteFile($driver) => $call,
            #[cfg(any(feature = "postgres", feature = "mysql"))]
            Driver::Sql($driver) => $call,
            #[cfg(feature = "mongodb")]
            Driver::Document($driver) => $call,
            #[cfg(feature = "http")]
            Driver::Http($driver) => $call,
        }
    };
}

impl StorageDriver for Driver {
    fn name(&self) -> &'static str {
        dispatch!(self, d => d.name())
    }

    async fn initialize(&self) -> Result<()> {
        dispatch!(self, d => d.initialize().await)
    }

    async fn load(&self) -> Result<Option<Snapshot>> {
        dispatch!(self, d => d.load().await)
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        dispatch!(self, d => d.save(snapshot).await)
    }

    async fn close(&self) {
        dispatch!(self, d => d.close().await)
    }
}
