//! Live view over a ledger backend.
//!
//! Every migration gets a `watch` channel holding its latest committed
//! snapshot and a commit lock. Readers clone from the channel and never wait
//! on a writer; writers take the migration's lock, persist the new snapshot
//! through the backend, and only then publish it. A reader therefore never
//! observes progress that is not durable.
//!
//! New entries are published one at a time in `seq` order. The visible
//! watermark ([`ProgressLedger::visible_seq`]) only moves past a `seq` once
//! that entry can be read, so a reader that pins the watermark sees every
//! entry at or below it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{watch, Mutex};
use tracing::debug;
use uuid::Uuid;

use super::backend::LedgerBackend;
use super::memory::MemoryLedger;
use super::Migration;
use crate::error::{MigrateError, Result};

struct Entry {
    tx: watch::Sender<Migration>,
    commit: Mutex<()>,
}

impl Entry {
    fn new(migration: Migration) -> Arc<Self> {
        let (tx, _rx) = watch::channel(migration);
        Arc::new(Self {
            tx,
            commit: Mutex::new(()),
        })
    }
}

/// Progress ledger shared by the executor and the status/history service.
pub struct ProgressLedger {
    backend: Arc<dyn LedgerBackend>,
    entries: RwLock<HashMap<Uuid, Arc<Entry>>>,
    /// Serializes inserts so entries become visible in `seq` order.
    insert: Mutex<()>,
    visible_seq: AtomicU64,
}

impl ProgressLedger {
    /// Open a ledger over `backend`, loading every stored entry.
    pub async fn open(backend: Arc<dyn LedgerBackend>) -> Result<Self> {
        backend.init().await?;
        let existing = backend.load_all().await?;
        let visible_seq = existing.iter().map(|m| m.seq).max().unwrap_or(0);
        debug!(
            "Opened {} ledger with {} entries",
            backend.backend_type(),
            existing.len()
        );
        let entries = existing
            .into_iter()
            .map(|m| (m.id, Entry::new(m)))
            .collect();
        Ok(Self {
            backend,
            entries: RwLock::new(entries),
            insert: Mutex::new(()),
            visible_seq: AtomicU64::new(visible_seq),
        })
    }

    /// Empty ledger backed by a fresh [`MemoryLedger`].
    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(MemoryLedger::new()),
            entries: RwLock::new(HashMap::new()),
            insert: Mutex::new(()),
            visible_seq: AtomicU64::new(0),
        }
    }

    pub fn backend_type(&self) -> &'static str {
        self.backend.backend_type()
    }

    /// Persist a new entry under the backend's next `seq`, then publish it.
    pub async fn insert(&self, mut migration: Migration) -> Result<Migration> {
        let _guard = self.insert.lock().await;
        migration.seq = self.backend.insert(&migration).await?;
        self.entries
            .write()
            .insert(migration.id, Entry::new(migration.clone()));
        self.visible_seq.fetch_max(migration.seq, Ordering::SeqCst);
        Ok(migration)
    }

    /// Latest committed snapshot.
    pub fn get(&self, id: &Uuid) -> Option<Migration> {
        self.entries.read().get(id).map(|e| e.tx.borrow().clone())
    }

    /// Snapshot of every entry, unordered.
    pub fn list(&self) -> Vec<Migration> {
        self.entries
            .read()
            .values()
            .map(|e| e.tx.borrow().clone())
            .collect()
    }

    /// Highest `seq` whose entry is readable; every entry at or below it
    /// that this ledger knows of is readable too (0 when empty).
    pub fn visible_seq(&self) -> u64 {
        self.visible_seq.load(Ordering::SeqCst)
    }

    /// Push channel carrying each committed snapshot of `id`.
    pub fn subscribe(&self, id: &Uuid) -> Option<watch::Receiver<Migration>> {
        self.entries.read().get(id).map(|e| e.tx.subscribe())
    }

    /// Apply `f` under the migration's commit lock, persist, then publish.
    pub async fn update<F>(&self, id: &Uuid, f: F) -> Result<Migration>
    where
        F: FnOnce(&mut Migration),
    {
        let entry = self
            .entries
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| MigrateError::NotFound(id.to_string()))?;

        let _guard = entry.commit.lock().await;
        let mut next = entry.tx.borrow().clone();
        f(&mut next);
        next.updated_at = Utc::now();
        self.backend.save(&next).await?;
        entry.tx.send_replace(next.clone());
        Ok(next)
    }
}
