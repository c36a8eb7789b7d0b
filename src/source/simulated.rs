//! In-process frame source for testing and dry runs.
//!
//! This source keeps one counter per camera and provides:
//! - Simulated request latency
//! - Controllable failure injection
//! - Interference injection (another consumer taking frames)
//! - Request logging for test verification

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::FrameSource;
use crate::camera::CameraId;
use crate::error::SourceError;
use crate::frame_id::FrameId;

/// One request as seen by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRequest {
    /// Camera the frames were requested for
    pub camera: CameraId,
    /// Number of frames requested
    pub count: u32,
}

/// Frames taken by someone else right after a given request.
#[derive(Debug, Clone, Copy)]
struct Interference {
    camera: CameraId,
    after_request: usize,
    frames: u32,
}

#[derive(Debug)]
struct State {
    /// Next identifier each camera will issue, `None` once the counter ran out
    next: HashMap<CameraId, Option<FrameId>>,
    requests: Vec<FrameRequest>,
    fail_next: Option<SourceError>,
    malformed_next: bool,
    interference: Vec<Interference>,
    latency: Duration,
}

/// Simulated frame source
///
/// # Example
///
/// ```
/// use gen2_visit::camera::CameraId;
/// use gen2_visit::source::SimulatedFrameSource;
///
/// let a = CameraId::new('A').unwrap();
/// let source = SimulatedFrameSource::new("PFS").with_camera(a, 100, 37);
/// assert_eq!(source.position(a), Some((100, 37)));
/// ```
#[derive(Clone, Debug)]
pub struct SimulatedFrameSource {
    instrument_code: String,
    state: Arc<Mutex<State>>,
}

impl SimulatedFrameSource {
    /// Create a source with no cameras for `instrument_code`.
    pub fn new(instrument_code: impl Into<String>) -> Self {
        Self {
            instrument_code: instrument_code.into(),
            state: Arc::new(Mutex::new(State {
                next: HashMap::new(),
                requests: Vec::new(),
                fail_next: None,
                malformed_next: false,
                interference: Vec::new(),
                latency: Duration::ZERO,
            })),
        }
    }

    /// Add `camera` whose next frame will be `visit`/`subframe`.
    ///
    /// Cameras with an unrepresentable position are ignored, and requests
    /// against them fail as unknown.
    pub fn with_camera(self, camera: CameraId, visit: u32, subframe: u8) -> Self {
        if let Some(id) = FrameId::new(&self.instrument_code, camera, visit, subframe) {
            self.lock().next.insert(camera, Some(id));
        }
        self
    }

    /// Set simulated latency for every request
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock().latency = latency;
        self
    }

    /// Make the next request fail with `err`
    pub fn inject_failure(&self, err: SourceError) {
        self.lock().fail_next = Some(err);
    }

    /// Make the next request return garbage identifiers
    pub fn inject_malformed(&self) {
        self.lock().malformed_next = true;
    }

    /// After the `nth` (1-based) request for `camera` completes, let another
    /// consumer take `frames` frames from that camera.
    pub fn interfere_after(&self, camera: CameraId, nth: usize, frames: u32) {
        self.lock().interference.push(Interference {
            camera,
            after_request: nth,
            frames,
        });
    }

    /// `(visit, subframe)` of the next frame `camera` will issue.
    ///
    /// `None` for unknown cameras and for exhausted counters.
    pub fn position(&self, camera: CameraId) -> Option<(u32, u8)> {
        self.lock()
            .next
            .get(&camera)
            .and_then(Option::as_ref)
            .map(|id| (id.visit(), id.subframe()))
    }

    /// All requests received so far, in order.
    pub fn requests(&self) -> Vec<FrameRequest> {
        self.lock().requests.clone()
    }

    /// Requests received for `camera`, in order.
    pub fn requests_for(&self, camera: CameraId) -> Vec<u32> {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.camera == camera)
            .map(|r| r.count)
            .collect()
    }

    /// Total frames issued to this source's callers for `camera`.
    pub fn frames_issued(&self, camera: CameraId) -> u64 {
        self.requests_for(camera).iter().map(|&n| u64::from(n)).sum()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn issue(&self, camera: CameraId, count: u32) -> Result<Vec<String>, SourceError> {
        let mut state = self.lock();
        state.requests.push(FrameRequest { camera, count });

        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }
        let malformed = std::mem::take(&mut state.malformed_next);

        let mut next = state
            .next
            .get(&camera)
            .cloned()
            .ok_or_else(|| SourceError::Unavailable(format!("unknown camera {camera}")))?;

        let mut frames = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = next.ok_or_else(|| {
                SourceError::Unavailable(format!("frame counter exhausted for camera {camera}"))
            })?;
            frames.push(if malformed {
                format!("{}XXXXXXXX", id.prefix())
            } else {
                id.to_string()
            });
            next = id.successor();
        }

        let nth = state.requests.iter().filter(|r| r.camera == camera).count();
        let stolen: u32 = state
            .interference
            .iter()
            .filter(|i| i.camera == camera && i.after_request == nth)
            .map(|i| i.frames)
            .sum();
        for _ in 0..stolen {
            next = next.and_then(|id| id.successor());
        }

        state.next.insert(camera, next);
        Ok(frames)
    }
}

#[async_trait]
impl FrameSource for SimulatedFrameSource {
    async fn request_frames(
        &self,
        camera: CameraId,
        count: u32,
    ) -> Result<Vec<String>, SourceError> {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.issue(camera, count)
    }
}
