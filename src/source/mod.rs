//! Frame sources.
//!
//! A [`FrameSource`] mints frame identifiers for one camera at a time. It is the only
//! thing the visit allocator talks to, and it owns the per-camera counters: nothing in
//! this crate caches or rewinds them.
//!
//! - [`SimulatedFrameSource`]: in-process counters, used for tests and dry runs
//! - [`CommandFrameSource`]: asks an external program for frames

pub mod command;
pub mod simulated;

pub use command::CommandFrameSource;
pub use simulated::{FrameRequest, SimulatedFrameSource};

use async_trait::async_trait;

use crate::camera::CameraId;
use crate::error::SourceError;

/// Authority issuing per-camera frame identifiers.
///
/// `request_frames(camera, n)` returns `n` fresh identifiers for `camera`, each one
/// the successor of the previous. Requests against one camera are consumed
/// irreversibly and must not be interleaved by concurrent callers.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Requests `count` new frame identifiers for `camera`, in issue order.
    async fn request_frames(&self, camera: CameraId, count: u32)
        -> Result<Vec<String>, SourceError>;
}

#[async_trait]
impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    async fn request_frames(
        &self,
        camera: CameraId,
        count: u32,
    ) -> Result<Vec<String>, SourceError> {
        (**self).request_frames(camera, count).await
    }
}

#[async_trait]
impl<S: FrameSource + ?Sized> FrameSource for std::sync::Arc<S> {
    async fn request_frames(
        &self,
        camera: CameraId,
        count: u32,
    ) -> Result<Vec<String>, SourceError> {
        (**self).request_frames(camera, count).await
    }
}
