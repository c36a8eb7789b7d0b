//! Filesystem visit sequence for degraded operation.
//!
//! When the frame source cannot be reached the service may hand out visits from this
//! local sequence instead. The service raises the sequence to every visit it issues
//! from the frame source, so a fallback number never repeats one already issued.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::frame_id::MAX_VISIT;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SequenceState {
    last_visit: u32,
    updated_at: DateTime<Utc>,
}

/// Visit sequence stored as a small JSON file.
#[derive(Debug, Clone)]
pub struct FallbackSequence {
    path: PathBuf,
}

impl FallbackSequence {
    /// Sequence stored at `path`. A missing file means no visit was issued yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// State file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last visit recorded in the sequence, 0 if none.
    pub async fn last(&self) -> AppResult<u32> {
        Ok(self.read().await?.map_or(0, |s| s.last_visit))
    }

    /// Advances the sequence and returns the new visit.
    pub async fn next(&self) -> AppResult<u32> {
        let last = self.last().await?;
        let visit = last
            .checked_add(1)
            .filter(|&v| v <= MAX_VISIT)
            .ok_or_else(|| AppError::Fallback(format!("sequence exhausted at {last}")))?;
        self.write(visit).await?;
        Ok(visit)
    }

    /// Makes sure the sequence is at least `visit`.
    pub async fn raise_to(&self, visit: u32) -> AppResult<()> {
        if self.last().await? < visit {
            self.write(visit).await?;
        }
        Ok(())
    }

    async fn read(&self) -> AppResult<Option<SequenceState>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => serde_json::from_str(&contents).map(Some).map_err(|e| {
                AppError::Fallback(format!("corrupt sequence file {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, visit: u32) -> AppResult<()> {
        let state = SequenceState {
            last_visit: visit,
            updated_at: Utc::now(),
        };
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&state)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(visit, path = %self.path.display(), "fallback sequence updated");
        Ok(())
    }
}
