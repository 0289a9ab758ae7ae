//! Configuration validation.

use super::{Config, LedgerBackendKind};
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    let engine = &config.engine;

    if engine.batch_size == 0 {
        return Err(MigrateError::Config(
            "engine.batch_size must be at least 1".into(),
        ));
    }
    if engine.sample_size == 0 {
        return Err(MigrateError::Config(
            "engine.sample_size must be at least 1".into(),
        ));
    }
    if engine.io_timeout_secs == 0 {
        return Err(MigrateError::Config(
            "engine.io_timeout_secs must be at least 1".into(),
        ));
    }
    if !(0.0..=1.0).contains(&engine.max_error_rate) {
        return Err(MigrateError::Config(format!(
            "engine.max_error_rate must be between 0 and 1, got {}",
            engine.max_error_rate
        )));
    }
    if engine.max_backoff_ms < engine.retry_backoff_ms {
        return Err(MigrateError::Config(
            "engine.max_backoff_ms must not be below engine.retry_backoff_ms".into(),
        ));
    }

    if config.ledger.backend == LedgerBackendKind::File && config.ledger.path.is_none() {
        return Err(MigrateError::Config(
            "ledger.path is required for the file backend".into(),
        ));
    }

    Ok(())
}
