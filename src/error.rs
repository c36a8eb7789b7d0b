//! Error types for visit allocation and the surrounding service.
//!
//! This module defines two layers of errors, both built on `thiserror`:
//!
//! - **`VisitError`**: the faults one visit allocation can end in. Every variant is
//!   fatal to the allocation attempt that raised it and is surfaced to the caller
//!   unmodified. Frames already consumed from the frame source stay consumed.
//! - **`AppError`**: the application-level error. It wraps `VisitError` together with
//!   configuration, I/O and serialization failures so that the service, the ledger and
//!   the CLI can use `?` throughout.
//!
//! ## Fault kinds
//!
//! - **Transport** (`SourceUnavailable`, `SourceTimeout`): the frame source could not
//!   answer. The caller may retry the whole allocation or fall back to a degraded
//!   sequence.
//! - **Protocol** (`MalformedIdentifier`, `MalformedResponse`, `CatchUpFailed`,
//!   `SequenceDiscontinuity`, `ReconciliationFailed`): the answers broke the counter
//!   contract. Only `SequenceDiscontinuity` is worth retrying, since it signals another
//!   consumer taking frames from the same camera.

use std::time::Duration;

use thiserror::Error;

use crate::camera::CameraId;
use crate::config::ConfigError;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Error reported by a [`FrameSource`](crate::source::FrameSource) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The source could not be reached or refused the request.
    #[error("frame source unavailable: {0}")]
    Unavailable(String),

    /// The source did not answer in time.
    #[error("frame source timed out after {0:?}")]
    Timeout(Duration),
}

/// Faults ending one visit allocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VisitError {
    /// A frame identifier failed to decode.
    #[error("malformed frame identifier '{frame}': {reason}")]
    MalformedIdentifier {
        /// The raw identifier as returned by the source
        frame: String,
        /// What was wrong with it
        reason: String,
    },

    /// The source returned a different number of identifiers than requested.
    #[error("camera {camera}: requested {requested} frames, received {received}")]
    MalformedResponse {
        /// Camera the request was made for
        camera: CameraId,
        /// Number of frames requested
        requested: u32,
        /// Number of frames returned
        received: usize,
    },

    /// Catching up to the next block boundary did not land on subframe 0.
    #[error("frame catch-up to block boundary for camera {camera} failed: landed on {frame}")]
    CatchUpFailed {
        /// Camera being caught up
        camera: CameraId,
        /// Last identifier returned by the catch-up request
        frame: String,
    },

    /// The trailing self-check did not end on subframe 99 of the candidate visit.
    #[error("frame discard to block end for camera {camera} failed: {first} vs {last}")]
    SequenceDiscontinuity {
        /// Camera being checked
        camera: CameraId,
        /// Identifier that opened the block
        first: String,
        /// Identifier that should have closed the block
        last: String,
    },

    /// Cameras still disagree after the lagging ones were advanced.
    #[error("cameras disagree on visit after reconciliation to {target}: {disagreeing:?}")]
    ReconciliationFailed {
        /// Visit every camera was being advanced to
        target: u32,
        /// Cameras whose candidate differs from the target, with their candidate
        disagreeing: Vec<(CameraId, u32)>,
    },

    /// Transport failure talking to the frame source.
    #[error("frame source unavailable for camera {camera}: {reason}")]
    SourceUnavailable {
        /// Camera the request was made for
        camera: CameraId,
        /// Transport error text
        reason: String,
    },

    /// A frame request exceeded its time limit.
    #[error("frame request for camera {camera} timed out after {timeout:?}")]
    SourceTimeout {
        /// Camera the request was made for
        camera: CameraId,
        /// The limit that was exceeded
        timeout: Duration,
    },

    /// Allocation was asked to reconcile no cameras at all.
    #[error("camera set is empty")]
    EmptyCameraSet,
}

impl VisitError {
    /// Maps a source-side error onto the fault for `camera`.
    pub fn from_source(camera: CameraId, err: SourceError) -> Self {
        match err {
            SourceError::Unavailable(reason) => VisitError::SourceUnavailable { camera, reason },
            SourceError::Timeout(timeout) => VisitError::SourceTimeout { camera, timeout },
        }
    }

    /// True for faults where the frame source never answered.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            VisitError::SourceUnavailable { .. } | VisitError::SourceTimeout { .. }
        )
    }

    /// True for faults where running the whole allocation again can succeed.
    pub fn is_retryable(&self) -> bool {
        self.is_transport() || matches!(self, VisitError::SequenceDiscontinuity { .. })
    }
}

/// Application-level error.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Visit allocation error: {0}")]
    Visit(#[from] VisitError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Fallback sequence error: {0}")]
    Fallback(String),

    #[error("Log parse error: {0}")]
    LogParse(String),
}
