// Backup module - snapshots of a server data directory

use crate::error::{WardenError, Result};
use crate::process::ServerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const METADATA_FILE: &str = "backup.json";
const DATA_DIR: &str = "data";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub id: String,
    pub server_id: ServerId,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub file_count: u64,
}

/// Backups live in `<root>/<server_id>/<backup_id>/`: `backup.json` holds the
/// metadata and `data/` the copied tree
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn server_dir(&self, server_id: &ServerId) -> PathBuf {
        self.root.join(server_id.as_str())
    }

    fn backup_dir(&self, server_id: &ServerId, backup_id: &str) -> Result<PathBuf> {
        // Backup ids come from remote clients; keep them inside the server dir.
        if backup_id.is_empty()
            || backup_id.contains(['/', '\\'])
            || backup_id == "."
            || backup_id == ".."
        {
            return Err(WardenError::BackupNotFound(backup_id.to_string()));
        }
        Ok(self.server_dir(server_id).join(backup_id))
    }

    /// Snapshot `source` into a new backup
    pub async fn write_archive(
        &self,
        server_id: &ServerId,
        source: &Path,
        label: Option<String>,
    ) -> Result<BackupRecord> {
        let created_at = Utc::now();
        let id = format!(
            "{}-{}",
            created_at.format("%Y%m%d%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let target = self.server_dir(server_id).join(&id);
        let source = source.to_path_buf();
        let server_id = server_id.clone();

        tokio::task::spawn_blocking(move || -> Result<BackupRecord> {
            if !source.is_dir() {
                return Err(WardenError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("Data directory does not exist: {}", source.display()),
                )));
            }

            fs::create_dir_all(&target)?;
            let stats = match copy_tree(&source, &target.join(DATA_DIR)) {
                Ok(stats) => stats,
                Err(e) => {
                    let _ = fs::remove_dir_all(&target);
                    return Err(e.into());
                }
            };

            let record = BackupRecord {
                id,
                server_id,
                label,
                created_at,
                size_bytes: stats.bytes,
                file_count: stats.files,
            };
            fs::write(target.join(METADATA_FILE), serde_json::to_vec_pretty(&record)?)?;
            Ok(record)
        })
        .await
        .map_err(|e| WardenError::Internal(format!("Backup task failed: {}", e)))?
    }

    /// Replace the contents of `dest` with the snapshot `backup_id`
    pub async fn read_archive(&self, server_id: &ServerId, backup_id: &str, dest: &Path) -> Result<()> {
        let dir = self.backup_dir(server_id, backup_id)?;
        let data = dir.join(DATA_DIR);
        if !dir.join(METADATA_FILE).is_file() || !data.is_dir() {
            return Err(WardenError::BackupNotFound(backup_id.to_string()));
        }
        let dest = dest.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<()> {
            // Copy next to the destination first so a failed restore leaves
            // the current data untouched.
            let staging = staging_path(&dest);
            if staging.exists() {
                fs::remove_dir_all(&staging)?;
            }
            if let Err(e) = copy_tree(&data, &staging) {
                let _ = fs::remove_dir_all(&staging);
                return Err(e.into());
            }
            if dest.exists() {
                fs::remove_dir_all(&dest)?;
            }
            fs::rename(&staging, &dest)?;
            Ok(())
        })
        .await
        .map_err(|e| WardenError::Internal(format!("Restore task failed: {}", e)))?
    }

    /// Backups of one server, newest first
    pub async fn list(&self, server_id: &ServerId) -> Result<Vec<BackupRecord>> {
        let dir = self.server_dir(server_id);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta_path = entry.path().join(METADATA_FILE);
            let Ok(bytes) = tokio::fs::read(&meta_path).await else {
                continue;
            };
            match serde_json::from_slice::<BackupRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(path = %meta_path.display(), error = %e, "skipping unreadable backup metadata"),
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    pub async fn get(&self, server_id: &ServerId, backup_id: &str) -> Result<BackupRecord> {
        let dir = self.backup_dir(server_id, backup_id)?;
        let bytes = tokio::fs::read(dir.join(METADATA_FILE))
            .await
            .map_err(|_| WardenError::BackupNotFound(backup_id.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn delete(&self, server_id: &ServerId, backup_id: &str) -> Result<()> {
        let dir = self.backup_dir(server_id, backup_id)?;
        if !dir.is_dir() {
            return Err(WardenError::BackupNotFound(backup_id.to_string()));
        }
        tokio::fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    /// Drop every backup of a removed server
    pub async fn delete_all(&self, server_id: &ServerId) -> Result<()> {
        let dir = self.server_dir(server_id);
        if dir.is_dir() {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct CopyStats {
    files: u64,
    bytes: u64,
}

fn staging_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "data".to_string());
    dest.with_file_name(format!(".{}.restore", name))
}

/// Recursively copy `from` into `to`. Symlinks are skipped.
fn copy_tree(from: &Path, to: &Path) -> io::Result<CopyStats> {
    let mut stats = CopyStats::default();
    fs::create_dir_all(to)?;

    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = to.join(entry.file_name());

        if file_type.is_dir() {
            let nested = copy_tree(&entry.path(), &target)?;
            stats.files += nested.files;
            stats.bytes += nested.bytes;
        } else if file_type.is_file() {
            stats.bytes += fs::copy(entry.path(), &target)?;
            stats.files += 1;
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn world(dir: &Path) {
        fs::create_dir_all(dir.join("worlds")).unwrap();
        fs::write(dir.join("server.properties"), "motd=hello\n").unwrap();
        fs::write(dir.join("worlds").join("level.dat"), vec![7u8; 128]).unwrap();
    }

    #[tokio::test]
    async fn test_write_list_and_read_archive() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("data");
        world(&data);

        let store = BackupStore::new(tmp.path().join("backups"));
        let id = ServerId::from("srv");
        let record = store
            .write_archive(&id, &data, Some("before update".into()))
            .await
            .unwrap();
        assert_eq!(record.file_count, 2);
        assert_eq!(record.size_bytes, 11 + 128);

        let listed = store.list(&id).await.unwrap();
        assert_eq!(listed, vec![record.clone()]);

        fs::write(data.join("server.properties"), "motd=changed\n").unwrap();
        fs::write(data.join("extra.txt"), "new").unwrap();

        store.read_archive(&id, &record.id, &data).await.unwrap();
        assert_eq!(
            fs::read_to_string(data.join("server.properties")).unwrap(),
            "motd=hello\n"
        );
        assert!(!data.join("extra.txt").exists());
        assert!(data.join("worlds").join("level.dat").exists());
    }

    #[tokio::test]
    async fn test_unknown_backup() {
        let tmp = TempDir::new().unwrap();
        let store = BackupStore::new(tmp.path());
        let id = ServerId::from("srv");

        assert!(matches!(
            store.read_archive(&id, "nope", tmp.path()).await,
            Err(WardenError::BackupNotFound(_))
        ));
        assert!(matches!(
            store.read_archive(&id, "../../etc", tmp.path()).await,
            Err(WardenError::BackupNotFound(_))
        ));
        assert!(matches!(
            store.delete(&id, "nope").await,
            Err(WardenError::BackupNotFound(_))
        ));
        assert!(store.list(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_source_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let store = BackupStore::new(tmp.path().join("backups"));
        let result = store
            .write_archive(&ServerId::from("srv"), &tmp.path().join("missing"), None)
            .await;
        assert!(matches!(result, Err(WardenError::Io(_))));
    }

    #[tokio::test]
    async fn test_delete_and_delete_all() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("data");
        world(&data);
        let store = BackupStore::new(tmp.path().join("backups"));
        let id = ServerId::from("srv");

        let a = store.write_archive(&id, &data, None).await.unwrap();
        store.write_archive(&id, &data, None).await.unwrap();
        assert_eq!(store.list(&id).await.unwrap().len(), 2);

        store.delete(&id, &a.id).await.unwrap();
        assert_eq!(store.list(&id).await.unwrap().len(), 1);
        assert!(store.get(&id, &a.id).await.is_err());

        store.delete_all(&id).await.unwrap();
        assert!(store.list(&id).await.unwrap().is_empty());
    }
}
