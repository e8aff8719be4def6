use crate::shared::frame::Frame;

/// A fiducial marker found in one image.
///
/// Corners are in pixel coordinates, ordered top-left, top-right,
/// bottom-right, bottom-left relative to the marker's own upright
/// orientation (not the image's).
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedMarker {
    pub id: u32,
    pub corners: [[f64; 2]; 4],
}

impl DetectedMarker {
    pub fn top_left(&self) -> [f64; 2] {
        self.corners[0]
    }
}

/// Domain interface for fiducial marker detection on a grayscale frame.
pub trait MarkerDetector: Send {
    fn detect(&mut self, gray: &Frame) -> Result<Vec<DetectedMarker>, Box<dyn std::error::Error>>;
}
