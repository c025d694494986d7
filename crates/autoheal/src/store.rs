//! Append-only record logs.
//!
//! Components only see the [`AppendLog`] contract: append a record, replay
//! records since a timestamp. Storage is either in memory or a JSONL file
//! with one serialized record per line.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use crate::errors::{AutohealError, AutohealResult};
use crate::model::{AlertTransition, ExecutionRecord};

/// Records that carry the time they were produced.
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Timestamped for ExecutionRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for AlertTransition {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Ordered, append-only, replayable record log.
#[async_trait]
pub trait AppendLog<T>: Send + Sync
where
    T: Timestamped + Clone + Send + Sync,
{
    /// Append one record.
    async fn append(&self, record: &T) -> AutohealResult<()>;

    /// Records with `timestamp >= since`, in append order.
    async fn since(&self, since: DateTime<Utc>) -> AutohealResult<Vec<T>>;

    /// Storage identifier for logging.
    fn storage_type(&self) -> &'static str;
}

/// In-memory log.
pub struct MemoryLog<T> {
    records: RwLock<Vec<T>>,
}

impl<T> Default for MemoryLog<T> {
    fn default() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }
}

impl<T> MemoryLog<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records appended so far.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl<T> AppendLog<T> for MemoryLog<T>
where
    T: Timestamped + Clone + Send + Sync,
{
    async fn append(&self, record: &T) -> AutohealResult<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn since(&self, since: DateTime<Utc>) -> AutohealResult<Vec<T>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.timestamp() >= since)
            .cloned()
            .collect())
    }

    fn storage_type(&self) -> &'static str {
        "memory"
    }
}

/// JSONL file log: one JSON object per line, opened in append mode.
pub struct JsonlLog<T> {
    path: PathBuf,
    /// Serializes writers so lines never interleave
    write_lock: Mutex<()>,
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonlLog<T> {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            _record: PhantomData,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl<T> AppendLog<T> for JsonlLog<T>
where
    T: Timestamped + Clone + Send + Sync + Serialize + DeserializeOwned,
{
    async fn append(&self, record: &T) -> AutohealResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AutohealError::Storage {
                reason: format!("failed to open {}: {e}", self.path.display()),
            })?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn since(&self, since: DateTime<Utc>) -> AutohealResult<Vec<T>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(record) if record.timestamp() >= since => records.push(record),
                Ok(_) => {}
                // A torn final line from a crash is skipped, not fatal
                Err(e) => warn!(
                    "Skipping unreadable line {} in {}: {e}",
                    lineno + 1,
                    self.path.display()
                ),
            }
        }
        Ok(records)
    }

    fn storage_type(&self) -> &'static str {
        "jsonl"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TerminalState;
    use chrono::{Duration, TimeZone};

    fn record(key: &str, at: DateTime<Utc>) -> ExecutionRecord {
        ExecutionRecord::new(key, TerminalState::Success, "executed", "", 3, at)
    }

    #[tokio::test]
    async fn test_memory_log_since() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let log = MemoryLog::new();
        log.append(&record("a", t0)).await.unwrap();
        log.append(&record("b", t0 + Duration::minutes(5))).await.unwrap();

        let recent = log.since(t0 + Duration::minutes(1)).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].command_key, "b");
        assert_eq!(log.len().await, 2);
    }

    #[tokio::test]
    async fn test_jsonl_log_replays_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log: JsonlLog<ExecutionRecord> = JsonlLog::new(dir.path().join("exec.jsonl"));
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        assert!(log.since(t0).await.unwrap().is_empty());

        for (i, key) in ["first", "second", "third"].iter().enumerate() {
            log.append(&record(key, t0 + Duration::seconds(i as i64)))
                .await
                .unwrap();
        }

        let all = log.since(t0).await.unwrap();
        let keys: Vec<_> = all.iter().map(|r| r.command_key.as_str()).collect();
        assert_eq!(keys, vec!["first", "second", "third"]);

        let tail = log.since(t0 + Duration::seconds(2)).await.unwrap();
        assert_eq!(tail.len(), 1);
    }

    #[tokio::test]
    async fn test_jsonl_log_skips_torn_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exec.jsonl");
        let log: JsonlLog<ExecutionRecord> = JsonlLog::new(&path);
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        log.append(&record("ok", t0)).await.unwrap();
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap()
            .write_all(b"{\"command_key\": \"tor")
            .await
            .unwrap();

        let all = log.since(t0).await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
