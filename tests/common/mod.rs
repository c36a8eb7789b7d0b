//! Common test utilities for visit allocation integration tests
//!
//! This module provides reusable helpers for:
//! - Building simulated frame sources with per-camera starting positions
//! - Wrapping them in allocators and services
//! - Asserting the post-allocation state of every camera

#![allow(dead_code)] // Utilities may not all be used by every test binary

use std::sync::Arc;
use std::time::Duration;

use gen2_visit::ledger::MemoryLedger;
use gen2_visit::source::SimulatedFrameSource;
use gen2_visit::{CameraId, CameraSet, VisitAllocator, VisitService};

/// Request timeout used by test allocators.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Camera `c`.
pub fn cam(c: char) -> CameraId {
    CameraId::new(c).expect("valid camera letter")
}

/// Source whose cameras' next frames are `(letter, visit, subframe)`.
pub fn source_at(positions: &[(char, u32, u8)]) -> SimulatedFrameSource {
    positions
        .iter()
        .fold(SimulatedFrameSource::new("PFS"), |source, &(c, visit, subframe)| {
            source.with_camera(cam(c), visit, subframe)
        })
}

/// Camera set in the order of `positions`.
pub fn cameras_of(positions: &[(char, u32, u8)]) -> CameraSet {
    CameraSet::new(positions.iter().map(|&(c, _, _)| cam(c))).expect("valid camera set")
}

/// Allocator over a clone of `source`, sharing its counters.
pub fn allocator(source: &SimulatedFrameSource) -> VisitAllocator<SimulatedFrameSource> {
    VisitAllocator::new(source.clone(), TEST_TIMEOUT)
}

/// Service over a clone of `source` with an in-memory ledger.
pub fn service(
    source: &SimulatedFrameSource,
    cameras: CameraSet,
) -> (VisitService<SimulatedFrameSource>, Arc<MemoryLedger>) {
    let ledger = Arc::new(MemoryLedger::new());
    let service = VisitService::new(allocator(source), cameras, "PFS", ledger.clone());
    (service, ledger)
}

/// Asserts every camera's next frame opens the block after `visit`.
///
/// # Panics
/// Panics naming the first camera that is elsewhere.
pub fn assert_all_next_at(source: &SimulatedFrameSource, cameras: &CameraSet, visit: u32) {
    for camera in cameras.iter() {
        assert_eq!(
            source.position(camera),
            Some((visit + 1, 0)),
            "camera {camera} is not positioned after visit {visit}"
        );
    }
}

/// The first visit block a camera whose next frame is `(visit, subframe)` can claim.
pub fn natural_boundary(visit: u32, subframe: u8) -> u32 {
    if subframe == 0 {
        visit
    } else {
        visit + 1
    }
}
