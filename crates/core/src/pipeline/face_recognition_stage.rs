use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::annotation::overlay::Overlay;
use crate::detection::domain::face_encoder::{FaceEncoder, FaceObservation};
use crate::detection::domain::known_faces::{FaceMatcher, KnownFaceRegistry};
use crate::shared::constants::FACE_REDETECT_INTERVAL;
use crate::shared::frame::Frame;
use crate::video::domain::image_writer::ImageWriter;

/// Faces found by the most recent re-detection, reused on the frames in
/// between.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FaceDetectionCache {
    pub faces: Vec<FaceObservation>,
}

/// Where unknown-face crops go and the process-wide crop number.
///
/// The counter is shared so crop names stay unique across stage rebuilds
/// (e.g. after a reconnect) for the life of the process.
#[derive(Clone)]
pub struct FaceCropSink {
    pub dir: PathBuf,
    pub writer: Arc<dyn ImageWriter + Sync>,
    pub counter: Arc<AtomicU64>,
}

impl FaceCropSink {
    fn save(&self, raw: &Frame, faces: &[FaceObservation]) -> usize {
        let mut saved = 0;
        for face in faces {
            let Some(crop) = raw.crop(&face.region) else {
                continue;
            };
            let n = self.counter.fetch_add(1, Ordering::Relaxed);
            let path = self.dir.join(format!("face{n}.png"));
            match self.writer.write(&path, &crop) {
                Ok(()) => saved += 1,
                Err(e) => log::warn!("Failed to save face crop {}: {e}", path.display()),
            }
        }
        saved
    }
}

/// What one invocation did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FaceStageReport {
    pub redetected: bool,
    pub faces: usize,
    pub crops_saved: usize,
}

/// Sampled face recognition.
///
/// Every call advances a counter; faces are located and encoded only when
/// the counter reaches a multiple of the interval. Other calls draw the
/// cached faces again.
pub struct FaceRecognitionStage {
    encoder: Box<dyn FaceEncoder>,
    registry: KnownFaceRegistry,
    matcher: FaceMatcher,
    interval: u64,
    counter: u64,
    cache: FaceDetectionCache,
    crops: FaceCropSink,
}

impl FaceRecognitionStage {
    pub fn new(
        encoder: Box<dyn FaceEncoder>,
        registry: KnownFaceRegistry,
        matcher: FaceMatcher,
        crops: FaceCropSink,
    ) -> Self {
        Self {
            encoder,
            registry,
            matcher,
            interval: FACE_REDETECT_INTERVAL,
            counter: 0,
            cache: FaceDetectionCache::default(),
            crops,
        }
    }

    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval.max(1);
        self
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn cache(&self) -> &FaceDetectionCache {
        &self.cache
    }

    /// Detects on `raw`, draws on `annotated`, and when `save_faces` is set
    /// writes every cached face region of `raw` to its own file.
    pub fn process(
        &mut self,
        annotated: &mut Frame,
        raw: &Frame,
        save_faces: bool,
        overlay: &Overlay,
    ) -> FaceStageReport {
        self.counter += 1;
        let redetected = self.counter % self.interval == 0;
        if redetected {
            match self.encoder.encode(raw) {
                Ok(faces) => {
                    log::debug!("Frame {}: {} faces", raw.index(), faces.len());
                    self.cache = FaceDetectionCache { faces };
                }
                // Previous faces stay on screen until the next sample.
                Err(e) => log::warn!("Face detection failed on frame {}: {e}", raw.index()),
            }
        }

        for face in &self.cache.faces {
            let name = self.matcher.identify(&self.registry, &face.embedding);
            overlay.draw_face(annotated, &face.region, name);
        }

        let crops_saved = if save_faces {
            self.crops.save(raw, &self.cache.faces)
        } else {
            0
        };

        FaceStageReport {
            redetected,
            faces: self.cache.faces.len(),
            crops_saved,
        }
    }
}
