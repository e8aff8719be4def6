use serde::Serialize;

/// What the video source reports about its stream at open time.
///
/// Network sources may change resolution mid-stream; `width` and `height`
/// always describe the most recently decoded frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
    pub source: String,
}
