//! Ledger of issued visits.
//!
//! Every visit handed out by the service is recorded together with who asked for it
//! and which fiber design it was issued for. Ledger writes are bookkeeping: the
//! service logs a failed write and still returns the visit.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, AppResult};

/// Where an issued visit number came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisitOrigin {
    /// Reconciled across all camera frame counters
    Gen2,
    /// Local filesystem sequence, used while the frame source was unreachable
    Fallback,
}

/// One issued visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitRecord {
    /// Visit number
    pub visit: u32,
    /// Who requested the visit
    pub description: String,
    /// Fiber design the visit was issued for, 0 when unknown
    pub design_id: i64,
    /// How the number was obtained
    pub origin: VisitOrigin,
    /// Issue time
    pub issued_at: DateTime<Utc>,
}

/// Storage for issued visits.
#[async_trait]
pub trait VisitLedger: Send + Sync {
    /// Append one record.
    async fn record(&self, record: &VisitRecord) -> AppResult<()>;
}

/// Ledger kept in memory.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: Mutex<Vec<VisitRecord>>,
}

impl MemoryLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records in insertion order.
    pub fn records(&self) -> Vec<VisitRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl VisitLedger for MemoryLedger {
    async fn record(&self, record: &VisitRecord) -> AppResult<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

/// Ledger appending one JSON object per line to a file.
#[derive(Debug, Clone)]
pub struct JsonLinesLedger {
    path: PathBuf,
}

impl JsonLinesLedger {
    /// Ledger writing to `path`; the file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Ledger file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads back every record in the file.
    pub async fn read_all(&self) -> AppResult<Vec<VisitRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str::<VisitRecord>(line).map_err(AppError::from))
            .collect()
    }
}

#[async_trait]
impl VisitLedger for JsonLinesLedger {
    async fn record(&self, record: &VisitRecord) -> AppResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
