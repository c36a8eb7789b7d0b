//! Visit allocation over per-camera frame counters.
//!
//! Each camera hands out frames in blocks of 100, one block per visit. A visit number
//! is only usable when every camera of the instrument has consumed the whole block
//! carrying that number, so that no exposure from any camera can be tagged with it
//! later.
//!
//! # Protocol
//!
//! 1. **Catch-up** (per camera): take one frame. If it does not open a block, take
//!    frames up to and including the next block start, which must then open a block.
//!    Then take the remaining 99 frames of the block; the last one must close the same
//!    visit. That block's visit number is the camera's candidate.
//! 2. **Reconciliation**: cameras whose candidate is below the largest one are caught
//!    up again, once per missing visit, until every camera holds the largest
//!    candidate.
//!
//! Frames are never returned to the source, so every fault leaves the consumed frames
//! behind. The allocator holds no counter state of its own.
//!
//! # Concurrency
//!
//! Requests are issued strictly one after another. Two allocations against the same
//! cameras must not overlap; [`VisitService`](crate::service::VisitService) holds a
//! lock for that. Interference by other consumers is detected by the catch-up
//! self-check, not prevented.

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::camera::{CameraId, CameraSet};
use crate::error::VisitError;
use crate::frame_id::{FrameId, LAST_SUBFRAME, SUBFRAMES_PER_VISIT};
use crate::source::FrameSource;

/// Allocates visit numbers from a [`FrameSource`].
///
/// Behavior changes are made by building a new allocator around a different source.
#[derive(Debug)]
pub struct VisitAllocator<S> {
    source: S,
    request_timeout: Duration,
}

impl<S: FrameSource> VisitAllocator<S> {
    /// Each frame request is bounded by `request_timeout`.
    pub fn new(source: S, request_timeout: Duration) -> Self {
        Self {
            source,
            request_timeout,
        }
    }

    /// The underlying frame source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns a visit number whose frame block has been fully consumed on every
    /// camera in `cameras`.
    ///
    /// Two successful calls never return the same number.
    ///
    /// # Errors
    ///
    /// Any [`VisitError`] raised by a frame request, a catch-up, or the final
    /// agreement check. No number is returned after a fault.
    pub async fn allocate_visit(&self, cameras: &CameraSet) -> Result<u32, VisitError> {
        if cameras.is_empty() {
            return Err(VisitError::EmptyCameraSet);
        }

        let mut candidates = Vec::with_capacity(cameras.len());
        for camera in cameras.iter() {
            let visit = self.catch_up(camera).await?;
            candidates.push((camera, visit));
        }

        let visit = self.reconcile(candidates).await?;
        info!(visit, "allocated visit");
        Ok(visit)
    }

    /// Consumes the next full frame block of `camera` and returns its visit number.
    ///
    /// # Errors
    ///
    /// - [`VisitError::CatchUpFailed`] if filling up to the block start does not land
    ///   on subframe 0
    /// - [`VisitError::SequenceDiscontinuity`] if the block does not end on subframe
    ///   99 of the same visit, i.e. someone else took frames meanwhile
    /// - transport and decoding faults from the requests themselves
    pub async fn catch_up(&self, camera: CameraId) -> Result<u32, VisitError> {
        let mut first = self.request_last(camera, 1).await?;

        if !first.is_block_start() {
            let fill = SUBFRAMES_PER_VISIT - u32::from(first.subframe());
            let landed = self.request_last(camera, fill).await?;
            warn!(
                camera = %camera,
                "frame for {camera} is not %100==0 {first}. Catching up to {landed}"
            );
            if !landed.is_block_start() {
                return Err(VisitError::CatchUpFailed {
                    camera,
                    frame: landed.to_string(),
                });
            }
            first = landed;
        }

        let last = self
            .request_last(camera, SUBFRAMES_PER_VISIT - 1)
            .await?;
        if last.visit() != first.visit() || last.subframe() != LAST_SUBFRAME {
            return Err(VisitError::SequenceDiscontinuity {
                camera,
                first: first.to_string(),
                last: last.to_string(),
            });
        }

        debug!(camera = %camera, visit = first.visit(), "camera block consumed");
        Ok(first.visit())
    }

    /// Advances lagging cameras until all candidates equal the largest one.
    async fn reconcile(&self, mut candidates: Vec<(CameraId, u32)>) -> Result<u32, VisitError> {
        let target = candidates
            .iter()
            .map(|&(_, visit)| visit)
            .max()
            .ok_or(VisitError::EmptyCameraSet)?;

        let mut lagging: Vec<(CameraId, u32)> = candidates
            .iter()
            .copied()
            .filter(|&(_, visit)| visit < target)
            .collect();
        if lagging.is_empty() {
            return Ok(target);
        }
        lagging.sort_by_key(|&(camera, visit)| (visit, camera));

        for (camera, visit) in lagging {
            let mut current = visit;
            for _ in 0..(target - visit) {
                warn!(
                    camera = %camera,
                    "bumping {camera} {current} to match {target}"
                );
                current = self.catch_up(camera).await?;
            }
            if let Some(entry) = candidates.iter_mut().find(|(c, _)| *c == camera) {
                entry.1 = current;
            }
        }

        let disagreeing: Vec<(CameraId, u32)> = candidates
            .into_iter()
            .filter(|&(_, visit)| visit != target)
            .collect();
        if !disagreeing.is_empty() {
            error!(target_visit = target, ?disagreeing, "cameras disagree after reconciliation");
            return Err(VisitError::ReconciliationFailed {
                target,
                disagreeing,
            });
        }

        Ok(target)
    }

    /// Requests `count` frames and decodes the last one.
    async fn request_last(&self, camera: CameraId, count: u32) -> Result<FrameId, VisitError> {
        let frames = self.request(camera, count).await?;
        match frames.last() {
            Some(frame) => frame.parse(),
            None => Err(VisitError::MalformedResponse {
                camera,
                requested: count,
                received: 0,
            }),
        }
    }

    async fn request(&self, camera: CameraId, count: u32) -> Result<Vec<String>, VisitError> {
        info!(camera = %camera, count, "reqframes num={count} type={camera}");

        let frames = timeout(
            self.request_timeout,
            self.source.request_frames(camera, count),
        )
        .await
        .map_err(|_| VisitError::SourceTimeout {
            camera,
            timeout: self.request_timeout,
        })?
        .map_err(|e| VisitError::from_source(camera, e))?;

        if frames.len() != count as usize {
            return Err(VisitError::MalformedResponse {
                camera,
                requested: count,
                received: frames.len(),
            });
        }

        debug!(camera = %camera, "framelist: {:?}", frames);
        Ok(frames)
    }
}
