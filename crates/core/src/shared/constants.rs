/// Default MJPEG endpoint served by the robot's camera streamer.
pub const DEFAULT_STREAM_URL: &str = "http://192.168.1.1:8080/?action=stream";

pub const DEFAULT_CALIBRATION_FILE: &str = "robo_cam.yaml";
pub const DEFAULT_KNOWN_FACES_FILE: &str = "Faces/Known/faces.txt";

pub const SCREENSHOT_DIR: &str = "Screenshots";
pub const VIDEO_DIR: &str = "Videos";
pub const FACE_CROP_DIR: &str = "Faces/Unknown";

pub const FACE_DETECTOR_MODEL_NAME: &str = "yolo11n-pose_widerface.onnx";
pub const FACE_DETECTOR_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/yolo11n-pose_widerface.onnx";

pub const FACE_EMBEDDING_MODEL_NAME: &str = "w600k_r50.onnx";
pub const FACE_EMBEDDING_MODEL_URL: &str =
    "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/w600k_r50.onnx";

/// Face locations and embeddings are recomputed on every Nth face frame.
pub const FACE_REDETECT_INTERVAL: u64 = 30;

/// A marker unseen for longer than this is reported as gone.
pub const MARKER_TIMEOUT_SECS: f64 = 2.0;

/// Printed marker side length in metres.
pub const DEFAULT_MARKER_LENGTH_M: f64 = 0.05;

pub const RECORDING_FPS: u32 = 20;

/// Published frames are scaled to fit the console's video panel.
pub const DISPLAY_WIDTH: u32 = 640;
pub const DISPLAY_HEIGHT: u32 = 480;

pub const UNKNOWN_FACE_LABEL: &str = "Unknown";
