//! File-based ledger backend for resume across process restarts.
//!
//! Several processes may share one ledger file. Every operation takes an
//! advisory lock on `<ledger>.lock` and works on what is on disk at that
//! moment: writes re-read the file, merge their entry, and write it back;
//! inserts allocate `seq` from the stored entries. Nothing is cached
//! between operations.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};
use uuid::Uuid;

use super::backend::LedgerBackend;
use super::Migration;
use crate::error::{MigrateError, Result};

type HmacSha256 = Hmac<Sha256>;

/// On-disk ledger document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerFile {
    /// Random identity of this ledger, used as the signing key.
    pub ledger_id: String,

    /// Entries in `seq` order.
    pub migrations: Vec<Migration>,

    /// HMAC-SHA256 over the document with this field cleared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

impl LedgerFile {
    pub fn new() -> Self {
        Self {
            ledger_id: Uuid::new_v4().to_string(),
            migrations: Vec::new(),
            hmac: None,
        }
    }

    fn compute_hmac(&self) -> Result<String> {
        let mut unsigned = self.clone();
        unsigned.hmac = None;

        let content = serde_json::to_string(&unsigned)
            .map_err(|e| MigrateError::Ledger(format!("Failed to serialize ledger for HMAC: {}", e)))?;

        let mut mac = HmacSha256::new_from_slice(self.ledger_id.as_bytes())
            .map_err(|e| MigrateError::Ledger(format!("Failed to create HMAC: {}", e)))?;
        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Read and verify a ledger file.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: Self = serde_json::from_str(&content)?;

        match &file.hmac {
            Some(stored) => {
                if *stored != file.compute_hmac()? {
                    return Err(MigrateError::Ledger(
                        "Ledger file integrity check failed: HMAC mismatch".to_string(),
                    ));
                }
            }
            None => {
                warn!("Ledger file has no HMAC signature, integrity cannot be verified");
            }
        }
        Ok(file)
    }

    /// Read `path`, or start an empty document when it does not exist yet.
    fn read_or_new(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::read(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Sign and write atomically (temp file, then rename).
    pub fn write<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.hmac = Some(self.compute_hmac()?);

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| MigrateError::Ledger(format!("Failed to serialize ledger: {}", e)))?;

        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    fn next_seq(&self) -> u64 {
        self.migrations.iter().map(|m| m.seq).max().unwrap_or(0) + 1
    }

    fn upsert(&mut self, migration: &Migration) {
        match self.migrations.iter_mut().find(|m| m.id == migration.id) {
            Some(existing) => *existing = migration.clone(),
            None => {
                self.migrations.push(migration.clone());
                self.migrations.sort_by_key(|m| m.seq);
            }
        }
    }
}

impl Default for LedgerFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Path of the lock file guarding a ledger file.
fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Advisory lock on a ledger's lock file, released when dropped.
struct LedgerLock {
    _file: File,
}

impl LedgerLock {
    fn acquire(path: &Path, exclusive: bool) -> Result<Self> {
        let lock_path = lock_path_for(path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        // fs2's method, not std's `File::lock_exclusive` on newer toolchains.
        let locked = if exclusive {
            FileExt::lock_exclusive(&file)
        } else {
            FileExt::lock_shared(&file)
        };
        locked.map_err(|e| {
            MigrateError::Ledger(format!("Failed to lock {}: {}", lock_path.display(), e))
        })?;
        Ok(Self { _file: file })
    }
}

/// Ledger backend storing every entry in one signed JSON file.
pub struct FileLedger {
    path: PathBuf,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Run `f` on a blocking thread while holding the ledger lock.
    async fn locked<T, F>(&self, exclusive: bool, f: F) -> Result<T>
    where
        F: FnOnce(&Path) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let _lock = LedgerLock::acquire(&path, exclusive)?;
            f(&path)
        })
        .await
        .map_err(|e| MigrateError::Ledger(format!("ledger task failed: {}", e)))?
    }
}

#[async_trait]
impl LedgerBackend for FileLedger {
    async fn init(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let entries = self
            .locked(true, |path| {
                let mut file = LedgerFile::read_or_new(path)?;
                if file.hmac.is_none() {
                    file.write(path)?;
                }
                Ok(file.migrations.len())
            })
            .await?;
        debug!("Ledger {} loaded with {} entries", self.path.display(), entries);
        Ok(())
    }

    async fn insert(&self, migration: &Migration) -> Result<u64> {
        let mut migration = migration.clone();
        self.locked(true, move |path| {
            let mut file = LedgerFile::read_or_new(path)?;
            migration.seq = file.next_seq();
            file.upsert(&migration);
            file.write(path)?;
            Ok(migration.seq)
        })
        .await
    }

    async fn save(&self, migration: &Migration) -> Result<()> {
        let migration = migration.clone();
        self.locked(true, move |path| {
            let mut file = LedgerFile::read_or_new(path)?;
            file.upsert(&migration);
            file.write(path)
        })
        .await
    }

    async fn load_all(&self) -> Result<Vec<Migration>> {
        self.locked(false, |path| Ok(LedgerFile::read_or_new(path)?.migrations))
            .await
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{DestinationDescriptor, SourceDescriptor, TableSchema};
    use crate::state::{MigrationProgress, MigrationStatus};
    use tempfile::TempDir;

    fn migration(seq: u64) -> Migration {
        let mut m = Migration::new(
            SourceDescriptor::jsonl("users.jsonl", "users"),
            DestinationDescriptor::jsonl("out", "people"),
            TableSchema {
                table: "users".into(),
                schema: None,
                columns: Vec::new(),
                row_count: Some(3),
                estimated_size_mb: None,
            },
            Vec::new(),
            "CREATE TABLE people (id BIGINT)".into(),
            true,
            MigrationProgress::new(Some(3), 10),
        );
        m.seq = seq;
        m
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");

        let ledger = FileLedger::new(&path);
        ledger.init().await.unwrap();
        let mut m = migration(1);
        ledger.save(&m).await.unwrap();
        m.mark_running();
        m.committed_offset = 2;
        ledger.save(&m).await.unwrap();
        ledger.save(&migration(2)).await.unwrap();

        let reopened = FileLedger::new(&path);
        reopened.init().await.unwrap();
        let all = reopened.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, m.id);
        assert_eq!(all[0].status, MigrationStatus::Running);
        assert_eq!(all[0].committed_offset, 2);
    }

    #[tokio::test]
    async fn test_ledger_file_is_pretty_signed_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("ledger.json");
        let ledger = FileLedger::new(&path);
        ledger.init().await.unwrap();
        ledger.save(&migration(1)).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains('\n'));
        assert!(content.contains("\"hmac\""));
        assert!(content.contains("\"ledger_id\""));
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_tampered_ledger_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = FileLedger::new(&path);
        ledger.init().await.unwrap();
        ledger.save(&migration(1)).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, content.replace("\"pending\"", "\"succeeded\"")).unwrap();

        let err = FileLedger::new(&path).init().await.unwrap_err();
        assert!(matches!(err, MigrateError::Ledger(_)));
    }

    #[tokio::test]
    async fn test_two_ledgers_on_one_file_keep_both_entries() {
        use crate::state::ProgressLedger;
        use std::sync::Arc;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        let a = ProgressLedger::open(Arc::new(FileLedger::new(&path))).await.unwrap();
        let b = ProgressLedger::open(Arc::new(FileLedger::new(&path))).await.unwrap();

        let from_a = a.insert(migration(0)).await.unwrap();
        let from_b = b.insert(migration(0)).await.unwrap();
        assert_eq!(from_a.seq, 1);
        assert_eq!(from_b.seq, 2);

        a.update(&from_a.id, |m| m.mark_running()).await.unwrap();
        b.update(&from_b.id, |m| m.committed_offset = 3).await.unwrap();

        let reopened = ProgressLedger::open(Arc::new(FileLedger::new(&path))).await.unwrap();
        let mut all = reopened.list();
        all.sort_by_key(|m| m.seq);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, from_a.id);
        assert_eq!(all[0].status, MigrationStatus::Running);
        assert_eq!(all[1].id, from_b.id);
        assert_eq!(all[1].committed_offset, 3);
        assert!(lock_path_for(&path).exists());
    }

    #[tokio::test]
    async fn test_unsigned_ledger_is_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        let mut file = LedgerFile::new();
        file.migrations.push(migration(1));
        std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();

        let loaded = LedgerFile::read(&path).unwrap();
        assert_eq!(loaded.migrations.len(), 1);
    }
}
