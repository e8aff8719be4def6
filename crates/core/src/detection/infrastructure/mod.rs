pub mod calibration_loader;
pub mod onnx_face_encoder;
pub mod registry_loader;
pub mod square_marker_detector;
