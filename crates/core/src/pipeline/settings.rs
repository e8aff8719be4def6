use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detection::domain::known_faces::DEFAULT_MATCH_TOLERANCE;
use crate::detection::infrastructure::onnx_face_encoder::DEFAULT_CONFIDENCE;
use crate::shared::constants::{
    DEFAULT_CALIBRATION_FILE, DEFAULT_KNOWN_FACES_FILE, DEFAULT_MARKER_LENGTH_M,
    DEFAULT_STREAM_URL, DISPLAY_HEIGHT, DISPLAY_WIDTH, FACE_CROP_DIR, FACE_REDETECT_INTERVAL,
    MARKER_TIMEOUT_SECS, RECORDING_FPS, SCREENSHOT_DIR, VIDEO_DIR,
};

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything the pipeline needs to know at startup. Missing JSON fields
/// take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub stream_url: String,
    pub calibration_path: PathBuf,
    pub known_faces_file: PathBuf,
    /// Root for `Screenshots/`, `Videos/` and `Faces/Unknown/`.
    pub output_dir: PathBuf,
    pub marker_length_m: f64,
    pub match_tolerance: f64,
    pub face_confidence: f64,
    pub face_redetect_interval: u64,
    pub marker_timeout_secs: f64,
    pub recording_fps: u32,
    /// 0 waits forever.
    pub read_timeout_ms: u64,
    pub display_width: u32,
    pub display_height: u32,
    pub label_font: Option<PathBuf>,
    /// Checked for the ONNX models before the download cache.
    pub models_dir: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            stream_url: DEFAULT_STREAM_URL.to_string(),
            calibration_path: PathBuf::from(DEFAULT_CALIBRATION_FILE),
            known_faces_file: PathBuf::from(DEFAULT_KNOWN_FACES_FILE),
            output_dir: PathBuf::from("."),
            marker_length_m: DEFAULT_MARKER_LENGTH_M,
            match_tolerance: DEFAULT_MATCH_TOLERANCE,
            face_confidence: DEFAULT_CONFIDENCE,
            face_redetect_interval: FACE_REDETECT_INTERVAL,
            marker_timeout_secs: MARKER_TIMEOUT_SECS,
            recording_fps: RECORDING_FPS,
            read_timeout_ms: 5000,
            display_width: DISPLAY_WIDTH,
            display_height: DISPLAY_HEIGHT,
            label_font: None,
            models_dir: None,
        }
    }
}

impl PipelineSettings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let json = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn screenshot_dir(&self) -> PathBuf {
        self.output_dir.join(SCREENSHOT_DIR)
    }

    pub fn video_dir(&self) -> PathBuf {
        self.output_dir.join(VIDEO_DIR)
    }

    pub fn face_crop_dir(&self) -> PathBuf {
        self.output_dir.join(FACE_CROP_DIR)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }
}
