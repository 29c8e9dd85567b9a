//! The settings store
//!
//! [`ConfigStore`] is the only entry point consumers talk to. Reads and
//! writes of the in-memory [`Snapshot`] are synchronous; persistence runs in
//! the background on the tokio runtime the store was created in.

mod io;
mod operations;
mod scheduler;

pub use io::LoadSource;
pub use scheduler::{SaveOutcome, SaveScheduler};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::events::{EventKind, EventManager, StoreEvent, SubscriptionId};
use crate::snapshot::Snapshot;
use crate::storage::{BackendKind, Descriptor, Driver, FileDriver, JsonCodec, StorageDriver};
use crate::sync::{MutexExt, RwLockExt};

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use time::OffsetDateTime;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Whether a mutation should kick off a save right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Persist {
    /// Schedule a background save after the change (default).
    #[default]
    Immediate,
    /// Only mark the store dirty; the autosave or an explicit flush writes it.
    Deferred,
}

/// Process-wide settings store handle.
///
/// Cloning is cheap and every clone refers to the same store, so one
/// instance can be created at startup and handed to every consumer.
///
/// # Example
///
/// ```rust,no_run
/// use gcman::{ConfigStore, StoreConfig};
/// use serde_json::json;
///
/// # async fn run() -> gcman::Result<()> {
/// let store = ConfigStore::open(
///     StoreConfig::builder("my-bot")
///         .file("data/settings.json")
///         .autosave_interval_ms(10_000)
///         .build(),
/// )
/// .await?;
///
/// store.set_global("autoread", json!(true))?;
/// store.set_group_plugin("123@g.us", "welcome", json!({"text": "hi"}))?;
/// assert_eq!(store.get(None, "autoread"), Some(json!(true)));
///
/// store.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<StoreInner>,
}

pub(crate) struct StoreInner {
    config: StoreConfig,

    /// In-memory state; every mutation happens under this lock
    state: RwLock<StoreState>,

    events: EventManager,

    /// Backend all saves go to
    driver: Driver,

    /// Local file used as load fallback (same file as `driver` when no URL is set)
    local: FileDriver,

    scheduler: SaveScheduler,

    autosave: Mutex<Option<JoinHandle<()>>>,

    /// Runtime background saves are spawned on, if the store was created inside one
    runtime: Option<Handle>,

    closed: AtomicBool,
}

#[derive(Debug, Default)]
struct StoreState {
    snapshot: Snapshot,
    dirty: bool,
    /// Bumped on every mutation so a finished write only clears `dirty` if
    /// nothing changed while it ran
    generation: u64,
    startup: Option<OffsetDateTime>,
    /// No write may reach the backend before this is set
    loaded: bool,
}

impl StoreState {
    fn touch(&mut self) {
        self.dirty = true;
        self.generation = self.generation.wrapping_add(1);
    }
}

impl ConfigStore {
    /// Create a store without loading anything.
    ///
    /// The backend is chosen here from `config.database_url`; nothing is
    /// connected until [`load`](Self::load) or the first save.
    ///
    /// # Errors
    ///
    /// Configuration errors only: an invalid URL, an unknown scheme, or a
    /// backend whose cargo feature is disabled.
    pub fn new(config: StoreConfig) -> Result<Self> {
        let codec = if config.pretty_json {
            JsonCodec::new()
        } else {
            JsonCodec::compact()
        };
        let local = FileDriver::new(&config.file, codec);

        let driver = match &config.database_url {
            Some(url) => {
                let descriptor = Descriptor::parse(url)?;
                info!(
                    "Using {} settings backend at {}",
                    descriptor.kind,
                    descriptor.redacted()
                );
                Driver::from_descriptor(&descriptor, codec)?
            }
            None => {
                info!("Using local settings file {}", config.file.display());
                Driver::LocalFile(local.clone())
            }
        };

        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            debug!("No tokio runtime at store creation; background saves disabled");
        }

        Ok(Self {
            inner: Arc::new(StoreInner {
                config,
                state: RwLock::new(StoreState::default()),
                events: EventManager::new(),
                driver,
                local,
                scheduler: SaveScheduler::new(),
                autosave: Mutex::new(None),
                runtime,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Create a store, run the load pipeline and start the autosave timer.
    ///
    /// # Errors
    ///
    /// Anything [`new`](Self::new) or [`load`](Self::load) reports. Use those
    /// two directly to keep running after a corrupt settings file.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let store = Self::new(config)?;
        store.load().await?;
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Backend saves are written to.
    pub fn backend(&self) -> BackendKind {
        self.inner.driver.kind()
    }

    /// Event registry for `update` / `saved` / `deleteGroup` notifications.
    pub fn events(&self) -> &EventManager {
        &self.inner.events
    }

    /// Shorthand for `events().subscribe(..)`.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(kind, callback)
    }

    /// Shorthand for `events().unsubscribe(..)`.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    /// True if there are changes not yet written to the backend.
    pub fn is_dirty(&self) -> bool {
        self.inner.is_dirty()
    }

    /// True while a physical write is running.
    pub fn is_saving(&self) -> bool {
        self.inner.scheduler.is_in_flight()
    }

    /// Deep copy of the current state.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.state.read_recovered().snapshot.clone()
    }

    /// Time of the last successful load.
    pub fn get_startup_time(&self) -> Option<OffsetDateTime> {
        self.inner.state.read_recovered().startup
    }

    /// Write the current state if it has unsaved changes, waiting for any
    /// in-flight write to finish first.
    ///
    /// # Errors
    ///
    /// Propagates the backend failure, unlike background saves which only log.
    /// [`Error::NotLoaded`] if there are changes but the store was never
    /// loaded.
    pub async fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.inner.flush().await
    }

    /// Request a physical write regardless of the dirty flag.
    ///
    /// If a write is already running this returns
    /// [`SaveOutcome::Coalesced`] immediately and one follow-up write is
    /// made when the running one finishes.
    ///
    /// # Errors
    ///
    /// The backend failure, when this call performed the write.
    /// [`Error::NotLoaded`] before the first load.
    pub async fn save(&self) -> Result<SaveOutcome> {
        self.ensure_open()?;
        self.inner.save_coalesced().await
    }

    /// Final flush, then release backend connections, then stop the autosave.
    ///
    /// Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// The final flush failure, reported after cleanup has completed.
    pub async fn shutdown(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let flushed = self.inner.flush().await;
        if let Err(e) = &flushed {
            warn!("Final settings flush failed: {e}");
        }

        self.inner.driver.close().await;
        self.inner.stop_autosave();

        info!("Settings store shut down");
        flushed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(Error::ShutDown)
        } else {
            Ok(())
        }
    }
}

impl StoreInner {
    fn is_dirty(&self) -> bool {
        self.state.read_recovered().dirty
    }

    fn is_loaded(&self) -> bool {
        self.state.read_recovered().loaded
    }

    /// One physical write of the state as it is right now.
    async fn write_snapshot(&self) -> Result<()> {
        let (snapshot, generation) = {
            let state = self.state.read_recovered();
            if !state.loaded {
                return Err(Error::NotLoaded);
            }
            (state.snapshot.clone(), state.generation)
        };

        self.driver.save(&snapshot).await?;

        {
            let mut state = self.state.write_recovered();
            if state.generation == generation {
                state.dirty = false;
            }
        }
        debug!("Settings saved to {}", self.driver.name());
        self.events.emit(&StoreEvent::Saved);
        Ok(())
    }

    async fn save_coalesced(&self) -> Result<SaveOutcome> {
        self.scheduler.request(|| self.write_snapshot()).await
    }

    async fn flush(&self) -> Result<()> {
        if !self.is_dirty() && !self.scheduler.is_in_flight() {
            return Ok(());
        }
        self.scheduler
            .flush(|| self.write_snapshot())
            .await
            .map(|_| ())
    }

    /// Fire-and-forget save after a mutation. Errors are logged and the
    /// change stays dirty for the next attempt.
    fn schedule_save(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            debug!("Store closed; change kept in memory only");
            return;
        }
        if !self.is_loaded() {
            debug!("Store not loaded yet; change stays dirty");
            return;
        }
        let Some(runtime) = &self.runtime else {
            debug!("No runtime for background save; change stays dirty");
            return;
        };

        let inner = Arc::clone(self);
        runtime.spawn(async move {
            if let Err(e) = inner.save_coalesced().await {
                warn!("Background settings save failed: {e}");
            }
        });
    }

    fn stop_autosave(&self) {
        if let Some(handle) = self.autosave.lock_recovered().take() {
            handle.abort();
            debug!("Autosave stopped");
        }
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        self.stop_autosave();
    }
}
