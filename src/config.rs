//! Store configuration
//!
//! Three options drive the store: where the local file lives, how often the
//! autosave runs, and an optional database URL that selects an external
//! backend.

use std::path::PathBuf;
use std::time::Duration;

/// Default autosave period.
pub const DEFAULT_AUTOSAVE_MS: i64 = 30_000;

/// Environment variables read by [`StoreConfigBuilder::with_env`].
pub const ENV_FILE: &str = "GCMAN_SETTINGS_FILE";
pub const ENV_AUTOSAVE_MS: &str = "GCMAN_AUTOSAVE_MS";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

/// Configuration for initializing a [`ConfigStore`](crate::ConfigStore)
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Local settings file, also the fallback when the external backend is empty
    pub file: PathBuf,

    /// Autosave period; `None` disables the timer
    pub autosave_interval: Option<Duration>,

    /// Connection descriptor selecting an external backend
    pub database_url: Option<String>,

    /// Pretty-print JSON written to files
    pub pretty_json: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfigBuilder::new("gcman").build()
    }
}

impl StoreConfig {
    /// Create a new builder for StoreConfig
    ///
    /// # Example
    /// ```rust
    /// use gcman::StoreConfig;
    ///
    /// let config = StoreConfig::builder("my-bot")
    ///     .file("~/.config/my-bot/settings.json")
    ///     .autosave_interval_ms(10_000)
    ///     .build();
    /// ```
    pub fn builder(app_name: impl Into<String>) -> StoreConfigBuilder {
        StoreConfigBuilder::new(app_name)
    }
}

/// Builder for creating StoreConfig with a fluent API
#[derive(Debug, Clone)]
pub struct StoreConfigBuilder {
    app_name: String,
    file: Option<PathBuf>,
    autosave_ms: i64,
    database_url: Option<String>,
    pretty_json: bool,
}

impl StoreConfigBuilder {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            file: None,
            autosave_ms: DEFAULT_AUTOSAVE_MS,
            database_url: None,
            pretty_json: true,
        }
    }

    /// Set the local settings file.
    ///
    /// Supports `~` expansion for home directory.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(expand_home(path.into()));
        self
    }

    /// Autosave period in milliseconds. Zero or negative disables autosave.
    pub fn autosave_interval_ms(mut self, ms: i64) -> Self {
        self.autosave_ms = ms;
        self
    }

    /// Select an external backend (`postgres://`, `mysql://`, `mongodb://`,
    /// `file://`, `http(s)://`). Empty strings are ignored.
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.database_url = (!url.trim().is_empty()).then_some(url);
        self
    }

    /// Use compact JSON (no pretty printing)
    pub fn compact_json(mut self) -> Self {
        self.pretty_json = false;
        self
    }

    /// Apply overrides from the process environment.
    ///
    /// Unparseable autosave values are ignored with a warning.
    pub fn with_env(self) -> Self {
        self.with_env_source(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn with_env_source<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(file) = lookup(ENV_FILE).filter(|v| !v.is_empty()) {
            self = self.file(file);
        }
        if let Some(raw) = lookup(ENV_AUTOSAVE_MS) {
            match raw.trim().parse::<i64>() {
                Ok(ms) => self.autosave_ms = ms,
                Err(e) => log::warn!("Ignoring {ENV_AUTOSAVE_MS}={raw:?}: {e}"),
            }
        }
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self = self.database_url(url);
        }
        self
    }

    /// Build the StoreConfig
    ///
    /// If `file` is not set, uses `settings.json` in the system config
    /// directory for the app.
    pub fn build(self) -> StoreConfig {
        let file = self.file.unwrap_or_else(|| {
            dirs::config_dir()
                .map(|d| d.join(&self.app_name))
                .unwrap_or_else(|| PathBuf::from("."))
                .join("settings.json")
        });

        let autosave_interval = u64::try_from(self.autosave_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        StoreConfig {
            file,
            autosave_interval,
            database_url: self.database_url,
            pretty_json: self.pretty_json,
        }
    }
}

fn expand_home(path: PathBuf) -> PathBuf {
    if path.starts_with("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(path.strip_prefix("~").unwrap_or(&path));
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_builder_defaults() {
        let config = StoreConfig::builder("test-app").build();

        assert!(config.file.ends_with("settings.json"));
        assert_eq!(
            config.autosave_interval,
            Some(Duration::from_millis(DEFAULT_AUTOSAVE_MS as u64))
        );
        assert!(config.database_url.is_none());
        assert!(config.pretty_json);
    }

    #[test]
    fn test_autosave_disabled() {
        for ms in [0, -1, -30_000] {
            let config = StoreConfig::builder("test-app")
                .autosave_interval_ms(ms)
                .build();
            assert!(config.autosave_interval.is_none(), "{ms} should disable");
        }
    }

    #[test]
    fn test_builder_with_options() {
        let config = StoreConfig::builder("test-app")
            .file("/tmp/test-app/db.json")
            .database_url("postgres://localhost/app")
            .compact_json()
            .build();

        assert_eq!(config.file, PathBuf::from("/tmp/test-app/db.json"));
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/app")
        );
        assert!(!config.pretty_json);
    }

    #[test]
    fn test_blank_database_url_ignored() {
        let config = StoreConfig::builder("test-app").database_url("  ").build();
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_FILE, "/srv/bot/settings.json"),
            (ENV_AUTOSAVE_MS, "0"),
            (ENV_DATABASE_URL, "mongodb://db:27017/bot"),
        ]);
        let config = StoreConfig::builder("test-app")
            .with_env_source(|name| vars.get(name).map(|v| v.to_string()))
            .build();

        assert_eq!(config.file, PathBuf::from("/srv/bot/settings.json"));
        assert!(config.autosave_interval.is_none());
        assert_eq!(config.database_url.as_deref(), Some("mongodb://db:27017/bot"));
    }

    #[test]
    fn test_env_bad_interval_keeps_previous() {
        let config = StoreConfig::builder("test-app")
            .autosave_interval_ms(5_000)
            .with_env_source(|name| (name == ENV_AUTOSAVE_MS).then(|| "soon".to_string()))
            .build();

        assert_eq!(config.autosave_interval, Some(Duration::from_millis(5_000)));
    }

    #[test]
    fn test_home_expansion() {
        if let Some(home) = dirs::home_dir() {
            let config = StoreConfig::builder("test-app")
                .file("~/bot/settings.json")
                .build();
            assert_eq!(config.file, home.join("bot/settings.json"));
        }
    }
}
