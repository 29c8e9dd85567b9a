//! Load pipeline and autosave
//!
//! Load order: the external backend (if one is configured), then the local
//! file, then an empty snapshot that is written out immediately. Only a
//! backend that reports "nothing stored" is seeded from the local state.
//! Unparseable data is copied aside before anything can overwrite it; a
//! corrupt local file abandons the load.

use super::{ConfigStore, StoreInner};
use crate::error::{Error, Result};
use crate::snapshot::Snapshot;
use crate::storage::{BackendKind, StorageDriver, preserve_corrupt, preserve_corrupt_document};
use crate::sync::{MutexExt, RwLockExt};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;

/// Where the state adopted by [`ConfigStore::load`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// The configured external backend.
    Backend(BackendKind),
    /// The local settings file.
    LocalFile,
    /// Nothing stored anywhere; an empty document was created.
    Bootstrapped,
}

impl fmt::Display for LoadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadSource::Backend(kind) => write!(f, "{kind} backend"),
            LoadSource::LocalFile => f.write_str("local file"),
            LoadSource::Bootstrapped => f.write_str("new empty document"),
        }
    }
}

impl ConfigStore {
    /// Run the load pipeline and replace the in-memory state with the result.
    ///
    /// On success the autosave timer is started (if configured and not
    /// already running).
    ///
    /// # Errors
    ///
    /// - [`Error::Corrupt`] when the local file cannot be parsed. A copy is
    ///   kept next to it and the in-memory state is left untouched, so the
    ///   caller may carry on with [`assume_loaded`](Self::assume_loaded).
    /// - Configuration errors from the backend.
    /// - I/O errors reading the local file, writing the empty document, or
    ///   preserving an unparseable backend document. A backend document that
    ///   cannot be parsed is otherwise copied aside and the local file used.
    pub async fn load(&self) -> Result<LoadSource> {
        self.ensure_open()?;
        let source = self.inner.load().await?;
        self.start_autosave();
        Ok(source)
    }

    /// Accept the in-memory state as the store's contents without loading,
    /// then start the autosave like [`load`](Self::load) does.
    ///
    /// Until the store has been loaded every save is refused, so an empty
    /// state cannot replace stored settings. Call this to keep running after
    /// [`load`](Self::load) reported [`Error::Corrupt`]: the broken file has
    /// already been copied aside and the next save replaces it.
    pub fn assume_loaded(&self) {
        {
            let mut state = self.inner.state.write_recovered();
            state.loaded = true;
            state.startup.get_or_insert_with(OffsetDateTime::now_utc);
        }
        warn!("Settings store running without a successful load");
        self.start_autosave();
    }

    /// Start the periodic save timer. Does nothing if it is disabled in the
    /// configuration, already running, or there is no tokio runtime.
    pub fn start_autosave(&self) {
        let Some(period) = self.inner.config.autosave_interval else {
            debug!("Autosave disabled");
            return;
        };
        let Some(runtime) = &self.inner.runtime else {
            debug!("No runtime for autosave");
            return;
        };

        let mut slot = self.inner.autosave.lock_recovered();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        *slot = Some(runtime.spawn(autosave_loop(weak, period)));
        info!("Autosave every {} ms", period.as_millis());
    }
}

impl StoreInner {
    async fn load(&self) -> Result<LoadSource> {
        let kind = self.driver.kind();

        // Set only when the backend answered "nothing stored".
        let mut seed_backend = false;
        if kind.is_external() {
            match self.load_external().await {
                Ok(Some(snapshot)) => {
                    self.adopt(snapshot, false);
                    return Ok(self.loaded(LoadSource::Backend(kind)));
                }
                Ok(None) => {
                    info!("No settings in {kind} backend, trying local file");
                    seed_backend = true;
                }
                Err(e) if e.is_fatal() => return Err(e),
                // A copy must exist before the load goes on, so a failure to
                // write it ends the load.
                Err(Error::Malformed { path, reason }) => {
                    let backup = preserve_corrupt(&path).await?;
                    error!(
                        "Settings file {} is corrupt ({reason}); copy saved to {}, using local file",
                        path.display(),
                        backup.display()
                    );
                }
                Err(Error::MalformedDocument {
                    backend,
                    raw,
                    reason,
                }) => {
                    let backup =
                        preserve_corrupt_document(self.local.path(), backend, &raw).await?;
                    error!(
                        "Settings document in {backend} backend is corrupt ({reason}); copy saved to {}, using local file",
                        backup.display()
                    );
                }
                Err(e) => warn!("Loading from {kind} backend failed, using local file: {e}"),
            }
        }

        match self.local.load().await {
            Ok(Some(snapshot)) => {
                self.adopt(snapshot, seed_backend);
                Ok(self.loaded(LoadSource::LocalFile))
            }
            Ok(None) => {
                let empty = Snapshot::default();
                self.local.save(&empty).await?;
                info!(
                    "Created empty settings file {}",
                    self.local.path().display()
                );
                self.adopt(empty, seed_backend);
                Ok(self.loaded(LoadSource::Bootstrapped))
            }
            Err(Error::Malformed { path, reason }) => {
                let backup = preserve_corrupt(&path).await?;
                error!(
                    "Settings file {} is corrupt ({reason}); copy saved to {}",
                    path.display(),
                    backup.display()
                );
                Err(Error::Corrupt {
                    path,
                    backup,
                    reason,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn load_external(&self) -> Result<Option<Snapshot>> {
        self.driver.initialize().await?;
        self.driver.load().await
    }

    /// Replace the whole state with a freshly loaded snapshot.
    fn adopt(&self, snapshot: Snapshot, dirty: bool) {
        let mut state = self.state.write_recovered();
        state.snapshot = snapshot;
        state.dirty = dirty;
        state.loaded = true;
        state.generation = state.generation.wrapping_add(1);
        state.startup = Some(OffsetDateTime::now_utc());
    }

    fn loaded(&self, source: LoadSource) -> LoadSource {
        let state = self.state.read_recovered();
        info!(
            "Loaded settings from {source}: {} global keys, {} groups",
            state.snapshot.global_settings.len(),
            state.snapshot.group_settings.len()
        );
        source
    }
}

/// Periodic dirty check. Holds only a weak reference so a dropped store
/// ends the loop on the next tick.
async fn autosave_loop(store: Weak<StoreInner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = store.upgrade() else {
            debug!("Store dropped, autosave exiting");
            break;
        };
        if !inner.is_dirty() || !inner.is_loaded() {
            continue;
        }
        debug!("Autosave: writing dirty settings");
        if let Err(e) = inner.save_coalesced().await {
            warn!("Autosave failed: {e}");
        }
    }
}
