//! Frame ingestion.
//!
//! The stream loop talks to video transports through two traits:
//! - `StreamConnector` opens a connection string and hands back a source,
//! - `FrameSource` yields decoded frames, or discards them cheaply.
//!
//! `RtspConnector` is the production connector (GStreamer, feature
//! `rtsp-gstreamer`, or synthetic frames for `stub://` URLs). A source is
//! released by dropping it.

pub mod endpoint;
pub mod rtsp;

use anyhow::Result;

use crate::frame::Frame;

pub use endpoint::{redact, StreamEndpoints, StreamSettings};
pub use rtsp::{RtspConfig, RtspConnector, RtspSource};

/// Counters reported by a frame source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_decoded: u64,
    pub frames_grabbed: u64,
    pub healthy: bool,
}

/// An open video stream.
pub trait FrameSource: Send {
    /// Connection string with credentials removed.
    fn describe(&self) -> String;

    /// Advance past one frame without decoding it, where the transport allows.
    fn grab(&mut self) -> Result<()>;

    /// Decode the next frame. Errors mean the stream failed or ended.
    fn read(&mut self) -> Result<Frame>;

    fn stats(&self) -> SourceStats;
}

/// Opens frame sources from connection strings.
pub trait StreamConnector: Send + Sync {
    fn open(&self, url: &str) -> Result<Box<dyn FrameSource>>;
}
