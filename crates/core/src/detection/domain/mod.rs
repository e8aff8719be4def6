pub mod calibration;
pub mod face_encoder;
pub mod known_faces;
pub mod marker_detector;
pub mod marker_pose;
pub mod marker_tracker;
