use std::sync::atomic::{AtomicBool, Ordering};

/// Operator switches shared between the control surface and the frame
/// loop. Writers flip flags at any time; the loop reads them once per
/// frame through [`PipelineToggles::snapshot`], so a write is honoured no
/// later than the next frame.
#[derive(Debug, Default)]
pub struct PipelineToggles {
    face_recognition: AtomicBool,
    marker_tracking: AtomicBool,
    save_faces: AtomicBool,
    screenshot_raw: AtomicBool,
    screenshot_annotated: AtomicBool,
    recording: AtomicBool,
}

/// One frame's consistent view of [`PipelineToggles`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ToggleSnapshot {
    pub face_recognition: bool,
    pub marker_tracking: bool,
    pub save_faces: bool,
    pub screenshot_raw: bool,
    pub screenshot_annotated: bool,
    pub recording: bool,
}

/// Names accepted by [`PipelineToggles::set_by_name`].
pub const TOGGLE_NAMES: [&str; 6] = [
    "faces",
    "markers",
    "save-faces",
    "screenshot-raw",
    "screenshot",
    "record",
];

impl PipelineToggles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ToggleSnapshot {
        ToggleSnapshot {
            face_recognition: self.face_recognition.load(Ordering::Acquire),
            marker_tracking: self.marker_tracking.load(Ordering::Acquire),
            save_faces: self.save_faces.load(Ordering::Acquire),
            screenshot_raw: self.screenshot_raw.load(Ordering::Acquire),
            screenshot_annotated: self.screenshot_annotated.load(Ordering::Acquire),
            recording: self.recording.load(Ordering::Acquire),
        }
    }

    pub fn set_face_recognition(&self, on: bool) {
        self.face_recognition.store(on, Ordering::Release);
    }

    pub fn set_marker_tracking(&self, on: bool) {
        self.marker_tracking.store(on, Ordering::Release);
    }

    pub fn set_save_faces(&self, on: bool) {
        self.save_faces.store(on, Ordering::Release);
    }

    pub fn set_screenshot_raw(&self, on: bool) {
        self.screenshot_raw.store(on, Ordering::Release);
    }

    pub fn set_screenshot_annotated(&self, on: bool) {
        self.screenshot_annotated.store(on, Ordering::Release);
    }

    pub fn set_recording(&self, on: bool) {
        self.recording.store(on, Ordering::Release);
    }

    fn flag(&self, name: &str) -> Option<&AtomicBool> {
        Some(match name {
            "faces" => &self.face_recognition,
            "markers" => &self.marker_tracking,
            "save-faces" => &self.save_faces,
            "screenshot-raw" => &self.screenshot_raw,
            "screenshot" => &self.screenshot_annotated,
            "record" => &self.recording,
            _ => return None,
        })
    }

    /// Sets a flag by its command name. Returns `false` for unknown names.
    pub fn set_by_name(&self, name: &str, on: bool) -> bool {
        match self.flag(name) {
            Some(flag) => {
                flag.store(on, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Flips a flag by its command name and returns the new value.
    pub fn toggle_by_name(&self, name: &str) -> Option<bool> {
        self.flag(name)
            .map(|flag| !flag.fetch_xor(true, Ordering::AcqRel))
    }
}
