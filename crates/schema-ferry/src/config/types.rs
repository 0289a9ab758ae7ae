//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Analyzer and executor behavior.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Progress ledger storage.
    #[serde(default)]
    pub ledger: LedgerConfig,
}

/// Engine tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rows per batch (default: 10000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Records sampled to infer types when a source declares no schema (default: 1000).
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// Retries for a failing batch before the migration fails (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial retry backoff in milliseconds, doubled per attempt (default: 200).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Backoff ceiling in milliseconds (default: 5000).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Deadline for one source read or destination write, in seconds (default: 30).
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,

    /// Fraction of rows allowed to fail transformation (default: 0.01).
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,

    /// Text longer than this many characters is a row error rather than
    /// a truncation candidate (default: 1 MiB).
    #[serde(default = "default_truncate_hard_limit")]
    pub truncate_hard_limit: usize,

    /// Row errors kept verbatim in the ledger; the rest are only counted (default: 100).
    #[serde(default = "default_max_recorded_row_errors")]
    pub max_recorded_row_errors: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            sample_size: default_sample_size(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            io_timeout_secs: default_io_timeout_secs(),
            max_error_rate: default_max_error_rate(),
            truncate_hard_limit: default_truncate_hard_limit(),
            max_recorded_row_errors: default_max_recorded_row_errors(),
        }
    }
}

impl EngineConfig {
    /// Per-operation I/O deadline.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    /// Backoff before retry `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let ms = self
            .retry_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Where the progress ledger lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Storage backend (default: memory).
    #[serde(default)]
    pub backend: LedgerBackendKind,

    /// Ledger file for the `file` backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackendKind::Memory,
            path: None,
        }
    }
}

/// Ledger storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackendKind {
    /// Process-local; lost on exit.
    #[default]
    Memory,
    /// Signed JSON file, survives restarts.
    File,
}

fn default_batch_size() -> usize {
    10_000
}

fn default_sample_size() -> usize {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5000
}

fn default_io_timeout_secs() -> u64 {
    30
}

fn default_max_error_rate() -> f64 {
    0.01
}

fn default_truncate_hard_limit() -> usize {
    1_048_576
}

fn default_max_recorded_row_errors() -> usize {
    100
}
