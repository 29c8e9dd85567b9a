//! Relational backend: the whole snapshot as one row in a single table

use super::StorageDriver;
use crate::error::{Error, Result};
use crate::snapshot::Snapshot;
use log::{debug, info};
use std::time::Duration;
use tokio::sync::OnceCell;

/// Table holding the settings document.
pub const TABLE: &str = "gcman_settings";

/// Fixed primary key of the single settings row.
pub const ROW_ID: &str = "settings";

const MAX_CONNECTIONS: u32 = 4;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// SQL flavour spoken by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    MySql,
}

impl SqlDialect {
    fn name(self) -> &'static str {
        match self {
            SqlDialect::Postgres => "postgres",
            SqlDialect::MySql => "mysql",
        }
    }

    fn create_table(self) -> String {
        match self {
            SqlDialect::Postgres => format!(
                "CREATE TABLE IF NOT EXISTS {TABLE} (
                    id VARCHAR(64) PRIMARY KEY,
                    data TEXT NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )"
            ),
            SqlDialect::MySql => format!(
                "CREATE TABLE IF NOT EXISTS {TABLE} (
                    id VARCHAR(64) PRIMARY KEY,
                    data LONGTEXT NOT NULL,
                    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
                )"
            ),
        }
    }

    fn select(self) -> String {
        match self {
            SqlDialect::Postgres => format!("SELECT data FROM {TABLE} WHERE id = $1"),
            SqlDialect::MySql => format!("SELECT data FROM {TABLE} WHERE id = ?"),
        }
    }

    fn upsert(self) -> String {
        match self {
            SqlDialect::Postgres => format!(
                "INSERT INTO {TABLE} (id, data, updated_at) VALUES ($1, $2, NOW())
                 ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data, updated_at = NOW()"
            ),
            SqlDialect::MySql => format!(
                "INSERT INTO {TABLE} (id, data) VALUES (?, ?)
                 ON DUPLICATE KEY UPDATE data = VALUES(data)"
            ),
        }
    }
}

enum Pool {
    #[cfg(feature = "postgres")]
    Postgres(sqlx::PgPool),
    #[cfg(feature = "mysql")]
    MySql(sqlx::MySqlPool),
}

/// Postgres / MySQL driver backed by an `sqlx` pool created on first use.
pub struct SqlDriver {
    dialect: SqlDialect,
    url: String,
    pool: OnceCell<Pool>,
}

impl SqlDriver {
    /// # Errors
    ///
    /// [`Error::BackendDisabled`] if the dialect's feature is not compiled in.
    pub fn new(dialect: SqlDialect, url: impl Into<String>) -> Result<Self> {
        match dialect {
            #[cfg(feature = "postgres")]
            SqlDialect::Postgres => {}
            #[cfg(feature = "mysql")]
            SqlDialect::MySql => {}
            #[allow(unreachable_patterns)]
            other => return Err(Error::BackendDisabled(other.name())),
        }
        Ok(Self {
            dialect,
            url: url.into(),
            pool: OnceCell::new(),
        })
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    async fn pool(&self) -> Result<&Pool> {
        self.pool.get_or_try_init(|| self.connect()).await
    }

    async fn connect(&self) -> Result<Pool> {
        let backend = self.dialect.name();
        let pool = match self.dialect {
            #[cfg(feature = "postgres")]
            SqlDialect::Postgres => Pool::Postgres(
                sqlx::postgres::PgPoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .acquire_timeout(ACQUIRE_TIMEOUT)
                    .connect(&self.url)
                    .await
                    .map_err(|e| Error::backend(backend, e))?,
            ),
            #[cfg(feature = "mysql")]
            SqlDialect::MySql => Pool::MySql(
                sqlx::mysql::MySqlPoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .acquire_timeout(ACQUIRE_TIMEOUT)
                    .connect(&self.url)
                    .await
                    .map_err(|e| Error::backend(backend, e))?,
            ),
            #[allow(unreachable_patterns)]
            other => return Err(Error::BackendDisabled(other.name())),
        };

        let ddl = self.dialect.create_table();
        match &pool {
            #[cfg(feature = "postgres")]
            Pool::Postgres(p) => sqlx::query(&ddl).execute(p).await.map(|_| ()),
            #[cfg(feature = "mysql")]
            Pool::MySql(p) => sqlx::query(&ddl).execute(p).await.map(|_| ()),
        }
        .map_err(|e| Error::backend(backend, e))?;

        info!("Connected to {backend} settings table '{TABLE}'");
        Ok(pool)
    }
}

/// Parse the stored `data` column, keeping the raw text if it is not a
/// settings document.
fn decode(backend: &'static str, data: String) -> Result<Snapshot> {
    serde_json::from_str(&data).map_err(|e| Error::MalformedDocument {
        backend,
        reason: e.to_string(),
        raw: data,
    })
}

impl StorageDriver for SqlDriver {
    fn name(&self) -> &'static str {
        self.dialect.name()
    }

    async fn initialize(&self) -> Result<()> {
        self.pool().await.map(|_| ())
    }

    async fn load(&self) -> Result<Option<Snapshot>> {
        let backend = self.dialect.name();
        let sql = self.dialect.select();
        let row: Option<String> = match self.pool().await? {
            #[cfg(feature = "postgres")]
            Pool::Postgres(p) => {
                sqlx::query_scalar::<_, String>(&sql)
                    .bind(ROW_ID)
                    .fetch_optional(p)
                    .await
            }
            #[cfg(feature = "mysql")]
            Pool::MySql(p) => {
                sqlx::query_scalar::<_, String>(&sql)
                    .bind(ROW_ID)
                    .fetch_optional(p)
                    .await
            }
        }
        .map_err(|e| Error::backend(backend, e))?;

        let Some(data) = row else {
            debug!("No settings row in {backend}");
            return Ok(None);
        };

        decode(backend, data).map(Some)
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let backend = self.dialect.name();
        let data = serde_json::to_string(snapshot)?;
        let sql = self.dialect.upsert();
        match self.pool().await? {
            #[cfg(feature = "postgres")]
            Pool::Postgres(p) => {
                sqlx::query(&sql)
                    .bind(ROW_ID)
                    .bind(&data)
                    .execute(p)
                    .await
                    .map(|_| ())
            }
            #[cfg(feature = "mysql")]
            Pool::MySql(p) => {
                sqlx::query(&sql)
                    .bind(ROW_ID)
                    .bind(&data)
                    .execute(p)
                    .await
                    .map(|_| ())
            }
        }
        .map_err(|e| Error::backend(backend, e))?;

        debug!("Upserted settings row in {backend}");
        Ok(())
    }

    async fn close(&self) {
        match self.pool.get() {
            #[cfg(feature = "postgres")]
            Some(Pool::Postgres(p)) => p.close().await,
            #[cfg(feature = "mysql")]
            Some(Pool::MySql(p)) => p.close().await,
            None => {}
        }
    }
}
