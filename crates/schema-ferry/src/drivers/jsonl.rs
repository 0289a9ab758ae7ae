//! JSON-lines file connectors.
//!
//! A source is one file with one JSON object per line. Blank lines are
//! ignored and do not count as offsets. An optional sidecar file
//! `<file>.schema.json` holding `{"columns": [...]}` declares the schema.
//!
//! A destination is a directory. Each table gets a subdirectory holding
//! `_ddl.sql` and one file per applied batch:
//!
//! ```text
//! <dir>/<table>/_ddl.sql
//! <dir>/<table>/<migration-id>-<start:012>-<end:012>.jsonl
//! ```
//!
//! Batch files are written to a temp name and renamed into place, so a batch
//! is either fully present or absent. An existing file for the same range
//! makes the write a no-op.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tracing::debug;
use uuid::Uuid;

use crate::core::schema::ColumnDefinition;
use crate::core::traits::{
    BatchWrite, DestinationWriter, SourceInfo, SourceReader, WriteOutcome,
};
use crate::core::value::Record;
use crate::error::{MigrateError, Result};

const DDL_FILE: &str = "_ddl.sql";

#[derive(Debug, Deserialize)]
struct SchemaSidecar {
    columns: Vec<ColumnDefinition>,
}

/// Path of the schema sidecar for a data file.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".schema.json");
    PathBuf::from(name)
}

fn unreachable(path: &Path, e: impl std::fmt::Display) -> MigrateError {
    MigrateError::SourceUnreachable(format!("{}: {}", path.display(), e))
}

fn unavailable(path: &Path, e: impl std::fmt::Display) -> MigrateError {
    MigrateError::DestinationUnavailable(format!("{}: {}", path.display(), e))
}

/// Reads records from a JSON-lines file.
pub struct JsonlSource {
    path: PathBuf,
    columns: Option<Vec<ColumnDefinition>>,
    size_bytes: u64,
    /// `(record offset, byte position)` where the previous read stopped.
    cursor: Mutex<Option<(u64, u64)>>,
}

impl JsonlSource {
    /// Open a data file and its optional schema sidecar.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| unreachable(&path, e))?;
        if !meta.is_file() {
            return Err(unreachable(&path, "not a file"));
        }

        let sidecar = sidecar_path(&path);
        let columns = match tokio::fs::read_to_string(&sidecar).await {
            Ok(content) => {
                let parsed: SchemaSidecar =
                    serde_json::from_str(&content).map_err(|e| unreachable(&sidecar, e))?;
                debug!(
                    "{}: {} declared columns from sidecar",
                    path.display(),
                    parsed.columns.len()
                );
                Some(parsed.columns)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(unreachable(&sidecar, e)),
        };

        Ok(Self {
            path,
            columns,
            size_bytes: meta.len(),
            cursor: Mutex::new(None),
        })
    }

    /// Undecodable lines keep their offset as a malformed record.
    fn parse_line(line: &str, index: u64) -> Record {
        match serde_json::from_str::<JsonValue>(line) {
            Ok(value) => Record::from_json(value)
                .unwrap_or_else(|| Record::malformed("expected a JSON object")),
            Err(e) => {
                debug!("record {}: invalid JSON: {}", index, e);
                Record::malformed(format!("invalid JSON: {}", e))
            }
        }
    }
}

#[async_trait]
impl SourceReader for JsonlSource {
    async fn introspect(&self) -> Result<SourceInfo> {
        Ok(SourceInfo {
            columns: self.columns.clone(),
            row_count: None,
            estimated_size_mb: Some(self.size_bytes as f64 / (1024.0 * 1024.0)),
        })
    }

    async fn count_rows(&self) -> Result<Option<u64>> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| unreachable(&self.path, e))?;
        let mut lines = BufReader::new(file).lines();
        let mut count = 0u64;
        while let Some(line) = lines.next_line().await? {
            if !line.trim().is_empty() {
                count += 1;
            }
        }
        Ok(Some(count))
    }

    async fn read_records(&self, offset: u64, limit: usize) -> Result<Vec<Record>> {
        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| unreachable(&self.path, e))?;

        // Sequential reads continue from the previous stop instead of rescanning.
        let cached = *self.cursor.lock();
        let (mut index, start_pos) = cached.filter(|(o, _)| *o <= offset).unwrap_or((0, 0));
        file.seek(SeekFrom::Start(start_pos)).await?;
        let mut reader = BufReader::new(file);

        let mut pos = start_pos;
        let mut records = Vec::with_capacity(limit);
        let mut buf = String::new();
        while records.len() < limit {
            buf.clear();
            let n = reader.read_line(&mut buf).await?;
            if n == 0 {
                break;
            }
            pos += n as u64;
            let line = buf.trim();
            if line.is_empty() {
                continue;
            }
            if index >= offset {
                records.push(Self::parse_line(line, index));
            }
            index += 1;
        }

        *self.cursor.lock() = Some((index, pos));
        Ok(records)
    }

    fn describe(&self) -> String {
        format!("jsonl://{}", self.path.display())
    }
}

/// Writes batches as JSON-lines files under a directory.
pub struct JsonlDestination {
    dir: PathBuf,
}

impl JsonlDestination {
    /// Open (creating if needed) the destination directory.
    pub async fn open(dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| unavailable(&dir, e))?;
        Ok(Self { dir })
    }

    fn table_dir(&self, table: &str) -> PathBuf {
        self.dir.join(table)
    }

    /// DDL recorded for `table`, if it was created.
    pub async fn ddl(&self, table: &str) -> Option<String> {
        tokio::fs::read_to_string(self.table_dir(table).join(DDL_FILE))
            .await
            .ok()
    }

    /// Batch files present for a table, as `(path, migration, start, end)`.
    async fn batch_files(&self, table: &str) -> Result<Vec<(PathBuf, Uuid, u64, u64)>> {
        let dir = self.table_dir(table);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(unavailable(&dir, e)),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some((id, start, end)) = name.to_str().and_then(parse_batch_name) {
                files.push((entry.path(), id, start, end));
            }
        }
        files.sort_by_key(|(_, id, start, _)| (*id, *start));
        Ok(files)
    }
}

fn batch_name(id: Uuid, start: u64, end: u64) -> String {
    format!("{}-{:012}-{:012}.jsonl", id, start, end)
}

fn parse_batch_name(name: &str) -> Option<(Uuid, u64, u64)> {
    let stem = name.strip_suffix(".jsonl")?;
    let mut parts = stem.rsplitn(3, '-');
    let end = parts.next()?.parse().ok()?;
    let start = parts.next()?.parse().ok()?;
    let id = Uuid::parse_str(parts.next()?).ok()?;
    Some((id, start, end))
}

#[async_trait]
impl DestinationWriter for JsonlDestination {
    async fn ensure_table(&self, table: &str, ddl: &str) -> Result<()> {
        let dir = self.table_dir(table);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| unavailable(&dir, e))?;
        let ddl_path = dir.join(DDL_FILE);
        if tokio::fs::try_exists(&ddl_path).await.unwrap_or(false) {
            return Ok(());
        }
        tokio::fs::write(&ddl_path, format!("{};\n", ddl))
            .await
            .map_err(|e| unavailable(&ddl_path, e))?;
        debug!("created {}", ddl_path.display());
        Ok(())
    }

    async fn write_batch(&self, batch: &BatchWrite) -> Result<WriteOutcome> {
        let dir = self.table_dir(&batch.table);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| unavailable(&dir, e))?;

        let name = batch_name(batch.migration_id, batch.start_offset, batch.end_offset);
        let path = dir.join(&name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(WriteOutcome::AlreadyApplied);
        }

        // Drop stale files from an earlier attempt whose range overlaps.
        for (stale, id, start, end) in self.batch_files(&batch.table).await? {
            if id == batch.migration_id && start < batch.end_offset && end > batch.start_offset {
                tokio::fs::remove_file(&stale)
                    .await
                    .map_err(|e| unavailable(&stale, e))?;
            }
        }

        let mut content = String::new();
        for row in &batch.rows {
            let object: Map<String, JsonValue> = batch
                .columns
                .iter()
                .cloned()
                .zip(row.iter().map(|v| v.to_json()))
                .collect();
            content.push_str(&serde_json::to_string(&JsonValue::Object(object))?);
            content.push('\n');
        }

        let temp = dir.join(format!(".{}.tmp", name));
        tokio::fs::write(&temp, content)
            .await
            .map_err(|e| unavailable(&temp, e))?;
        tokio::fs::rename(&temp, &path)
            .await
            .map_err(|e| unavailable(&path, e))?;

        Ok(WriteOutcome::Applied {
            rows: batch.rows.len(),
        })
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        let mut total = 0u64;
        for (path, ..) in self.batch_files(table).await? {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| unavailable(&path, e))?;
            total += content.lines().filter(|l| !l.trim().is_empty()).count() as u64;
        }
        Ok(total)
    }

    fn describe(&self) -> String {
        format!("jsonl://{}", self.dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::SqlValue;
    use tempfile::TempDir;

    async fn write_source(dir: &TempDir, lines: &[&str]) -> PathBuf {
        let path = dir.path().join("users.jsonl");
        tokio::fs::write(&path, lines.join("\n")).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_source_reads_pages_in_order() {
        let dir = TempDir::new().unwrap();
        let path = write_source(
            &dir,
            &[r#"{"id":1}"#, "", r#"{"id":2}"#, r#"{"id":3}"#, r#"{"id":4}"#],
        )
        .await;
        let source = JsonlSource::open(path).await.unwrap();
        assert_eq!(source.count_rows().await.unwrap(), Some(4));

        let first = source.read_records(0, 3).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first[2].get("id"), Some(&SqlValue::Int(3)));

        let rest = source.read_records(3, 3).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].get("id"), Some(&SqlValue::Int(4)));

        // Going backwards rescans from the start.
        let again = source.read_records(1, 1).await.unwrap();
        assert_eq!(again[0].get("id"), Some(&SqlValue::Int(2)));
        assert!(source.read_records(4, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_source_sidecar_declares_columns() {
        let dir = TempDir::new().unwrap();
        let path = write_source(&dir, &[r#"{"ID":1}"#]).await;
        tokio::fs::write(
            sidecar_path(&path),
            r#"{"columns":[{"name":"ID","type":"bigint","nullable":false,"primary_key":true}]}"#,
        )
        .await
        .unwrap();
        let info = JsonlSource::open(path).await.unwrap().introspect().await.unwrap();
        let columns = info.columns.unwrap();
        assert_eq!(columns[0].name, "ID");
        assert!(columns[0].primary_key);
    }

    #[tokio::test]
    async fn test_missing_source_is_unreachable() {
        let dir = TempDir::new().unwrap();
        let err = JsonlSource::open(dir.path().join("absent.jsonl"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MigrateError::SourceUnreachable(_)));
    }

    #[tokio::test]
    async fn test_malformed_lines_keep_their_offset() {
        let dir = TempDir::new().unwrap();
        let path = write_source(&dir, &[r#"{"id":1}"#, "[1,2]", "{oops", r#"{"id":4}"#]).await;
        let source = JsonlSource::open(path).await.unwrap();
        let records = source.read_records(0, 10).await.unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].defect(), None);
        assert_eq!(records[1].defect(), Some("expected a JSON object"));
        assert!(records[2].defect().unwrap().starts_with("invalid JSON"));
        assert_eq!(records[3].get("id"), Some(&SqlValue::Int(4)));
    }

    #[tokio::test]
    async fn test_destination_batches_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let dest = JsonlDestination::open(dir.path().join("out")).await.unwrap();
        dest.ensure_table("people", "CREATE TABLE people (id BIGINT)")
            .await
            .unwrap();
        assert_eq!(
            dest.ddl("people").await.unwrap(),
            "CREATE TABLE people (id BIGINT);\n"
        );

        let batch = BatchWrite {
            migration_id: Uuid::new_v4(),
            table: "people".into(),
            columns: vec!["id".into(), "bio".into()],
            start_offset: 0,
            end_offset: 2,
            rows: vec![
                vec![SqlValue::Int(1), SqlValue::Text("a".into())],
                vec![SqlValue::Int(2), SqlValue::Null],
            ],
        };
        assert_eq!(
            dest.write_batch(&batch).await.unwrap(),
            WriteOutcome::Applied { rows: 2 }
        );
        assert_eq!(
            dest.write_batch(&batch).await.unwrap(),
            WriteOutcome::AlreadyApplied
        );
        assert_eq!(dest.row_count("people").await.unwrap(), 2);
    }

    #[test]
    fn test_batch_name_parses_back() {
        let id = Uuid::new_v4();
        let name = batch_name(id, 10, 20);
        assert_eq!(parse_batch_name(&name), Some((id, 10, 20)));
        assert_eq!(parse_batch_name(DDL_FILE), None);
    }
}
