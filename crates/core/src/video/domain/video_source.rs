use std::time::Duration;

use thiserror::Error;

use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;

/// Pulls decoded frames from a live stream (or any ffmpeg-readable URL).
///
/// `read_frame` blocks until the next frame is decoded; callers that need
/// a deadline wrap the source in a `CancellableSource`.
pub trait VideoSource: Send {
    fn open(&mut self, url: &str) -> Result<VideoMetadata, Box<dyn std::error::Error>>;

    /// Returns `Ok(None)` once the stream has ended.
    fn read_frame(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>>;

    /// Resolution of the most recently decoded frame, or the opened stream's
    /// advertised resolution before the first read.
    fn resolution(&self) -> Option<(u32, u32)>;

    fn close(&mut self);
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("failed to open video source {url}: {reason}")]
    Open { url: String, reason: String },
    #[error("video source ended")]
    Ended,
    #[error("no frame received within {0:?}")]
    Timeout(Duration),
    #[error("video source read failed: {0}")]
    Read(String),
    #[error("video source stopped")]
    Stopped,
}
