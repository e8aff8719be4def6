use crate::shared::frame::Frame;
use crate::shared::region::Region;

/// Fixed-length identity vector for one face.
pub type Embedding = Vec<f32>;

/// A located face together with its identity embedding.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceObservation {
    pub region: Region,
    pub embedding: Embedding,
}

/// Domain interface for face location + embedding.
///
/// Given an RGB image, returns zero or more face regions with one
/// embedding per region. Implementations may hold inference sessions,
/// hence `&mut self`.
pub trait FaceEncoder: Send {
    fn encode(&mut self, frame: &Frame) -> Result<Vec<FaceObservation>, Box<dyn std::error::Error>>;
}
