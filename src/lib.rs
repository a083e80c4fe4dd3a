//! Arrival Watch
//!
//! Watches a live camera feed and sends one photo alert each time a person
//! arrives, i.e. each time the scene goes from "nobody there" to "somebody
//! there". Repeats are suppressed while the person stays in view; the alert
//! re-arms after a configurable absence window.
//!
//! # Architecture
//!
//! One sequential loop per camera (`pipeline::CameraLoop`):
//!
//! 1. **Sampling**: most frames are discarded without decoding; extra frames
//!    are dropped when inference overruns its latency budget.
//! 2. **Detection**: sampled frames are downscaled and passed to a
//!    `DetectorBackend`; results are filtered by class, confidence and size.
//! 3. **Presence**: a two-state machine turns "seen / not seen" into arrivals.
//! 4. **Snapshot**: on arrival one frame is pulled from the full-resolution
//!    stream, cropped around the subject (preferring a face) and JPEG-encoded.
//! 5. **Dispatch**: the image is sent once through a `Notifier`; its
//!    temporary file is always removed.
//!
//! # Module Structure
//!
//! - `geometry`: frame sizes, boxes, coordinate remapping
//! - `frame`: decoded frames and the detection downscale
//! - `ingest`: stream connection strings and frame sources (RTSP, `stub://`)
//! - `detect`: detector traits, backends and the acceptance filter
//! - `presence`, `sampler`, `refine`, `snapshot`, `notify`: pipeline stages
//! - `pipeline`: the per-camera loop and shutdown flag
//! - `config`: file + environment configuration

pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod notify;
pub mod pipeline;
pub mod presence;
pub mod refine;
pub mod sampler;
pub mod snapshot;

pub use config::{AppConfig, DetectorKind};
pub use detect::{
    Detection, DetectionFilter, DetectionRequest, DetectorBackend, FocalRegionDetector,
    NoFocalRegion, StubBackend, PERSON_CLASS_ID,
};
pub use frame::Frame;
pub use geometry::{BoundingBox, FrameResolutionContext, FrameSize, PixelRect};
pub use ingest::{
    redact, FrameSource, RtspConfig, RtspConnector, RtspSource, StreamConnector,
    StreamEndpoints, StreamSettings,
};
pub use notify::{
    build_caption, DispatchOutcome, Dispatcher, Notifier, TelegramConfig, TelegramNotifier,
};
pub use pipeline::{CameraLoop, LoopSettings, LoopStats, Shutdown, StepOutcome, StreamHealth};
pub use presence::{PresenceState, PresenceTracker, Transition};
pub use refine::{RefineOutcome, RegionRefiner};
pub use sampler::{AdaptiveSampler, BoostPolicy, FrameAction};
pub use snapshot::{Snapshot, SnapshotCapturer, SnapshotJob, SnapshotSource};
