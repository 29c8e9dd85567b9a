//! JSON file driver, used for both the local file and `file://` URLs

use super::StorageDriver;
use crate::error::{Error, Result};
use crate::snapshot::Snapshot;
use log::{debug, warn};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::macros::format_description;

/// JSON encoding of a [`Snapshot`]
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    /// Pretty-printing codec (default for files)
    pub fn new() -> Self {
        Self { pretty: true }
    }

    /// Compact codec (no whitespace)
    pub fn compact() -> Self {
        Self { pretty: false }
    }

    pub fn encode(&self, snapshot: &Snapshot) -> Result<String> {
        if self.pretty {
            serde_json::to_string_pretty(snapshot).map_err(Error::from)
        } else {
            serde_json::to_string(snapshot).map_err(Error::from)
        }
    }

    pub fn decode(&self, content: &str) -> serde_json::Result<Snapshot> {
        serde_json::from_str(content)
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads and writes the settings document as a single JSON file.
#[derive(Debug, Clone)]
pub struct FileDriver {
    path: PathBuf,
    codec: JsonCodec,
    name: &'static str,
}

impl FileDriver {
    pub fn new(path: impl Into<PathBuf>, codec: JsonCodec) -> Self {
        Self {
            path: path.into(),
            codec,
            name: "local-file",
        }
    }

    /// Same driver, labelled as the `file://` backend in logs and errors.
    pub(crate) fn remote(path: impl Into<PathBuf>, codec: JsonCodec) -> Self {
        Self {
            name: "remote-file",
            ..Self::new(path, codec)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageDriver for FileDriver {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// A missing file is "not found"; unparseable content is [`Error::Malformed`].
    async fn load(&self) -> Result<Option<Snapshot>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No settings file at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::FileRead {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };

        self.codec
            .decode(&content)
            .map(Some)
            .map_err(|e| Error::Malformed {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    /// Atomic write: temp file + rename, so readers never see a partial file.
    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let content = self.codec.encode(snapshot)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let temp_path = temp_path(&self.path)?;

        tokio::fs::write(&temp_path, content.as_bytes())
            .await
            .map_err(|e| Error::FileWrite {
                path: temp_path.clone(),
                source: e,
            })?;

        set_owner_only(&temp_path);

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| Error::FileWrite {
                path: self.path.clone(),
                source: e,
            })?;

        debug!("Wrote settings to {}", self.path.display());
        Ok(())
    }
}

/// `<name>.tmp` next to the target, preserving the full original filename.
fn temp_path(path: &Path) -> Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        Error::Config(format!(
            "Invalid path '{}': must have a filename",
            path.display()
        ))
    })?;
    let mut temp_filename = file_name.to_os_string();
    temp_filename.push(".tmp");
    Ok(path.with_file_name(temp_filename))
}

/// Settings may hold tokens; keep the file readable by the owner only.
#[cfg(unix)]
fn set_owner_only(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        warn!("Could not restrict permissions on {}: {e}", path.display());
    }
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) {}

/// Copy an unparseable settings file aside as
/// `<name>.corrupt-<yyyymmddThhmmss>[-N]`, never replacing an earlier copy.
///
/// The original file is left where it is.
pub(crate) async fn preserve_corrupt(path: &Path) -> Result<PathBuf> {
    let backup = free_backup_path(path, "corrupt").await;

    tokio::fs::copy(path, &backup)
        .await
        .map_err(|e| Error::FileWrite {
            path: backup.clone(),
            source: e,
        })?;

    Ok(backup)
}

/// Write a malformed document fetched from `backend` next to the local
/// settings file as `<name>.<backend>-corrupt-<yyyymmddThhmmss>[-N]`.
pub(crate) async fn preserve_corrupt_document(
    local: &Path,
    backend: &str,
    raw: &str,
) -> Result<PathBuf> {
    if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::DirectoryCreate {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }

    let backup = free_backup_path(local, &format!("{backend}-corrupt")).await;
    tokio::fs::write(&backup, raw.as_bytes())
        .await
        .map_err(|e| Error::FileWrite {
            path: backup.clone(),
            source: e,
        })?;
    set_owner_only(&backup);

    Ok(backup)
}

/// First `<name>.<tag>-<stamp>[-N]` next to `path` that does not exist yet.
async fn free_backup_path(path: &Path, tag: &str) -> PathBuf {
    let stamp = OffsetDateTime::now_utc()
        .format(format_description!(
            "[year][month][day]T[hour][minute][second]"
        ))
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string());

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "settings".to_string());

    let mut attempt = 0u32;
    loop {
        let candidate_name = if attempt == 0 {
            format!("{file_name}.{tag}-{stamp}")
        } else {
            format!("{file_name}.{tag}-{stamp}-{attempt}")
        };
        let candidate = path.with_file_name(candidate_name);
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        attempt += 1;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Scope;
    use serde_json::json;
    use tempfile::tempdir;

    fn sample() -> Snapshot {
        let mut snap = Snapshot::default();
        snap.insert(&Scope::Global, "autoread", json!(true), "2026-01-01T00:00:00Z");
        snap.insert(
            &Scope::Group("123@g.us".into()),
            "welcome",
            json!({"text": "hi"}),
            "2026-01-01T00:00:00Z",
        );
        snap
    }

    #[test]
    fn test_codec_pretty_and_compact() {
        let snap = sample();
        assert!(JsonCodec::new().encode(&snap).unwrap().contains('\n'));
        assert!(!JsonCodec::compact().encode(&snap).unwrap().contains('\n'));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let driver = FileDriver::new(dir.path().join("absent.json"), JsonCodec::new());
        assert!(driver.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/dir/settings.json");
        let driver = FileDriver::new(&path, JsonCodec::new());

        let snap = sample();
        driver.save(&snap).await.unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("nested/dir/settings.json.tmp").exists());
        assert_eq!(driver.load().await.unwrap(), Some(snap));
    }

    #[tokio::test]
    async fn test_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = FileDriver::new(&path, JsonCodec::new())
            .load()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_preserve_corrupt_never_overwrites() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "garbage").unwrap();

        let first = preserve_corrupt(&path).await.unwrap();
        let second = preserve_corrupt(&path).await.unwrap();

        assert_ne!(first, second);
        assert_ne!(first, path);
        assert!(path.exists());
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "garbage");
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "garbage");
        assert!(
            first
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("settings.json.corrupt-")
        );
    }

    #[tokio::test]
    async fn test_preserve_corrupt_document_keeps_raw_body() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("data").join("settings.json");

        let first = preserve_corrupt_document(&local, "http", "{\"groupSettings\":\"oops\"}")
            .await
            .unwrap();
        let second = preserve_corrupt_document(&local, "http", "second")
            .await
            .unwrap();

        assert_ne!(first, second);
        assert!(!local.exists());
        assert_eq!(
            std::fs::read_to_string(&first).unwrap(),
            "{\"groupSettings\":\"oops\"}"
        );
        assert!(
            first
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("settings.json.http-corrupt-")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_written_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        FileDriver::new(&path, JsonCodec::new())
            .save(&Snapshot::default())
            .await
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
