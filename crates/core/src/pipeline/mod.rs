pub mod capture_manager;
pub mod face_recognition_stage;
pub mod frame_pipeline;
pub mod infrastructure;
pub mod marker_tracking_stage;
pub mod pipeline_logger;
pub mod settings;
pub mod toggles;
