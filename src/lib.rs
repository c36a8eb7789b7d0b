//! Visit allocation for a multi-camera instrument.
//!
//! Each camera of the instrument draws frame identifiers from its own Gen2 frame
//! counter. A *visit* tags one exposure across all cameras, so its number has to be
//! claimed on every counter at once. This library aligns the counters onto a common
//! block of 100 frames and hands out the block's visit number.
//!
//! - [`frame_id`]: frame identifier codec and identifier helpers
//! - [`source`]: the [`FrameSource`](source::FrameSource) seam and its implementations
//! - [`allocator`]: the catch-up and reconciliation protocol
//! - [`service`]: serialization, retries, fallback and the issued-visit ledger
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use gen2_visit::allocator::VisitAllocator;
//! use gen2_visit::camera::{CameraId, CameraSet};
//! use gen2_visit::source::SimulatedFrameSource;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let source = SimulatedFrameSource::new("PFS")
//!     .with_camera(CameraId::new('A').unwrap(), 205, 0)
//!     .with_camera(CameraId::new('B').unwrap(), 203, 0);
//! let allocator = VisitAllocator::new(source, Duration::from_secs(10));
//! let cameras = CameraSet::from_letters("AB").unwrap();
//! assert_eq!(allocator.allocate_visit(&cameras).await.unwrap(), 205);
//! # }
//! ```

pub mod allocator;
pub mod camera;
pub mod config;
pub mod error;
pub mod error_recovery;
pub mod fallback;
pub mod frame_id;
pub mod frame_times;
pub mod ledger;
pub mod service;
pub mod source;

pub use allocator::VisitAllocator;
pub use camera::{CameraId, CameraSet};
pub use error::{AppError, AppResult, SourceError, VisitError};
pub use service::{VisitRequest, VisitService};
