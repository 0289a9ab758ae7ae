//! Process-local ledger backend.
//!
//! Entries live only as long as the backend value. Sharing one
//! `Arc<MemoryLedger>` between successive executors lets tests exercise
//! restart and recovery without touching disk.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::backend::LedgerBackend;
use super::Migration;
use crate::error::Result;

/// In-memory ledger backend.
#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<HashMap<Uuid, Migration>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl LedgerBackend for MemoryLedger {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn insert(&self, migration: &Migration) -> Result<u64> {
        let mut entries = self.entries.lock();
        let seq = entries.values().map(|m| m.seq).max().unwrap_or(0) + 1;
        let mut stored = migration.clone();
        stored.seq = seq;
        entries.insert(stored.id, stored);
        Ok(seq)
    }

    async fn save(&self, migration: &Migration) -> Result<()> {
        self.entries.lock().insert(migration.id, migration.clone());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Migration>> {
        let mut all: Vec<Migration> = self.entries.lock().values().cloned().collect();
        all.sort_by_key(|m| m.seq);
        Ok(all)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
