//! # gcman - group settings store
//!
//! A process-wide key-value store for global and per-group settings of a
//! long-running bot, persisted as one JSON document to a local file or to an
//! external backend.
//!
//! ## Features
//!
//! - **Scoped settings**: global keys plus one settings map per group id
//! - **Pluggable storage**: local file, `file://`, PostgreSQL, MySQL, MongoDB
//!   or an HTTP endpoint, chosen from a single database URL
//! - **Write coalescing**: at most one write in flight, bursts collapse into a
//!   single follow-up write
//! - **Autosave**: periodic background save of unsaved changes
//! - **Safe loading**: falls back from the backend to the local file, and
//!   keeps a copy of a corrupt file instead of overwriting it
//! - **Change events**: synchronous `update`, `saved` and `deleteGroup`
//!   notifications
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gcman::{ConfigStore, StoreConfig};
//! use serde_json::{json, Map};
//!
//! # async fn example() -> gcman::Result<()> {
//! let store = ConfigStore::open(
//!     StoreConfig::builder("my-bot")
//!         .file("~/.config/my-bot/settings.json")
//!         .with_env()
//!         .build(),
//! )
//! .await?;
//!
//! store.set_global("autoread", json!("on"))?;
//! store.set("123@g.us", Some("welcome"), json!({"text": "hi"}))?;
//!
//! let mut defaults = Map::new();
//! defaults.insert("autoread".into(), json!(false));
//! let flags = store.get_multiple(Some("123@g.us"), &["autoread"], &defaults);
//! assert_eq!(flags["autoread"], json!(true));
//!
//! store.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Backends
//!
//! | URL | Backend | Feature |
//! |---|---|---|
//! | *(none)* | local JSON file | always |
//! | `file:///path/settings.json` | JSON file at that path | always |
//! | `postgres://`, `postgresql://` | PostgreSQL row | `postgres` |
//! | `mysql://` | MySQL row | `mysql` |
//! | `mongodb://`, `mongodb+srv://` | MongoDB document | `mongodb` |
//! | `http://`, `https://` | GET / POST endpoint | `http` (default) |
//!
//! ## Events
//!
//! ```rust,no_run
//! use gcman::{ConfigStore, EventKind, StoreEvent};
//!
//! # fn example(store: &ConfigStore) {
//! store.subscribe(EventKind::Update, |event| {
//!     if let StoreEvent::Update { scope, key, value } = event {
//!         println!("{scope:?}/{key} = {value}");
//!     }
//! });
//! # }
//! ```

mod config;
mod error;
mod events;
mod snapshot;
pub mod storage;
mod store;
mod sync;

pub use config::{
    DEFAULT_AUTOSAVE_MS, ENV_AUTOSAVE_MS, ENV_DATABASE_URL, ENV_FILE, StoreConfig,
    StoreConfigBuilder,
};
pub use error::{Error, Result};
pub use events::{EventCallback, EventKind, EventManager, StoreEvent, SubscriptionId};
pub use snapshot::{GLOBAL_SCOPE, Scope, ScopeSettings, Snapshot, truthy};
pub use storage::BackendKind;
pub use store::{ConfigStore, LoadSource, Persist, SaveOutcome, SaveScheduler};
