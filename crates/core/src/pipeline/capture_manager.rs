//! Screenshots and video recording of the processed stream.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::pipeline::toggles::ToggleSnapshot;
use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::image_writer::ImageWriter;
use crate::video::domain::video_writer::VideoWriter;

/// One-second resolution, filesystem-safe on every platform.
const TIMESTAMP_FORMAT: &str = "%d%b_%H-%M-%S";

/// Creates a fresh, unopened writer for each recording session.
pub type WriterFactory = Box<dyn FnMut() -> Box<dyn VideoWriter> + Send>;

/// `<dir>/pic_<ddMon_HH-MM-SS>.png`. Two captures in the same second
/// share a name, so the later one replaces the earlier.
pub fn screenshot_path(dir: &Path, time: DateTime<Local>) -> PathBuf {
    dir.join(format!("pic_{}.png", time.format(TIMESTAMP_FORMAT)))
}

/// `<dir>/vid_<ddMon_HH-MM-SS>.avi`.
pub fn recording_path(dir: &Path, time: DateTime<Local>) -> PathBuf {
    dir.join(format!("vid_{}.avi", time.format(TIMESTAMP_FORMAT)))
}

/// An open output video whose frame size is fixed when it starts.
pub struct RecordingSession {
    writer: Option<Box<dyn VideoWriter>>,
    path: PathBuf,
    size: (u32, u32),
    frames_written: usize,
}

impl RecordingSession {
    pub fn start(
        mut writer: Box<dyn VideoWriter>,
        path: PathBuf,
        size: (u32, u32),
        fps: u32,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let metadata = VideoMetadata {
            width: size.0,
            height: size.1,
            fps: fps as f64,
            codec: "mjpeg".into(),
            source: String::new(),
        };
        writer.open(&path, &metadata)?;
        Ok(Self {
            writer: Some(writer),
            path,
            size,
            frames_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    /// Writes `frame`, resized first if the stream changed size since the
    /// session started.
    pub fn write(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
        let writer = self.writer.as_mut().ok_or("recording already finished")?;
        if frame.size() == self.size {
            writer.write(frame)?;
        } else {
            writer.write(&frame.resized(self.size.0, self.size.1))?;
        }
        self.frames_written += 1;
        Ok(())
    }

    /// Flushes and closes the output.
    pub fn finish(mut self) -> Result<(PathBuf, usize), Box<dyn std::error::Error>> {
        if let Some(mut writer) = self.writer.take() {
            writer.close()?;
        }
        Ok((std::mem::take(&mut self.path), self.frames_written))
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.close() {
                log::warn!("Failed to finalize {}: {e}", self.path.display());
            }
        }
    }
}

/// What a recording toggle evaluation did.
#[derive(Debug)]
pub enum RecordingTransition {
    Unchanged,
    Started(PathBuf),
    StartFailed(String),
    Stopped { path: PathBuf, frames: usize },
    StopFailed { path: PathBuf, reason: String },
}

#[derive(Default)]
pub enum RecordingState {
    #[default]
    Idle,
    Recording(RecordingSession),
}

impl RecordingState {
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording(_))
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        match self {
            Self::Recording(session) => Some(session),
            Self::Idle => None,
        }
    }

    /// Idle→Recording on `true` (calling `start` for the new session),
    /// Recording→Idle on `false` (finalizing the session exactly once).
    pub fn on_toggle<F>(&mut self, enabled: bool, start: F) -> RecordingTransition
    where
        F: FnOnce() -> Result<RecordingSession, Box<dyn std::error::Error>>,
    {
        match (std::mem::take(self), enabled) {
            (Self::Idle, true) => match start() {
                Ok(session) => {
                    let path = session.path().to_path_buf();
                    *self = Self::Recording(session);
                    RecordingTransition::Started(path)
                }
                Err(e) => RecordingTransition::StartFailed(e.to_string()),
            },
            (Self::Recording(session), false) => {
                let path = session.path().to_path_buf();
                match session.finish() {
                    Ok((path, frames)) => RecordingTransition::Stopped { path, frames },
                    Err(e) => RecordingTransition::StopFailed {
                        path,
                        reason: e.to_string(),
                    },
                }
            }
            (state, _) => {
                *self = state;
                RecordingTransition::Unchanged
            }
        }
    }
}

/// Applies the screenshot and recording toggles to each processed frame.
///
/// Write failures are logged and skipped; they never stop the loop.
pub struct CaptureManager {
    screenshot_dir: PathBuf,
    video_dir: PathBuf,
    fps: u32,
    image_writer: Box<dyn ImageWriter>,
    writer_factory: WriterFactory,
    recording: RecordingState,
    // Set after a failed start so a stuck toggle doesn't retry every frame.
    start_failed: bool,
}

impl CaptureManager {
    pub fn new(
        screenshot_dir: PathBuf,
        video_dir: PathBuf,
        fps: u32,
        image_writer: Box<dyn ImageWriter>,
        writer_factory: WriterFactory,
    ) -> Self {
        Self {
            screenshot_dir,
            video_dir,
            fps,
            image_writer,
            writer_factory,
            recording: RecordingState::Idle,
            start_failed: false,
        }
    }

    pub fn recording(&self) -> &RecordingState {
        &self.recording
    }

    /// Runs one frame's captures: raw screenshot, annotated screenshot,
    /// then the recording state machine. Recordings take the raw frame.
    pub fn capture(
        &mut self,
        toggles: &ToggleSnapshot,
        raw: &Frame,
        annotated: &Frame,
        source_size: (u32, u32),
        now: DateTime<Local>,
    ) {
        if toggles.screenshot_raw {
            self.save_screenshot(raw, now);
        }
        if toggles.screenshot_annotated {
            self.save_screenshot(annotated, now);
        }
        self.update_recording(toggles.recording, source_size, now);
        if let RecordingState::Recording(session) = &mut self.recording {
            if let Err(e) = session.write(raw) {
                log::warn!("Skipping frame {} in {}: {e}", raw.index(), session.path().display());
            }
        }
    }

    /// Finalizes any open recording. Call when the loop ends.
    pub fn finish(&mut self) {
        let transition = self.recording.on_toggle(false, || Err("not starting".into()));
        log_transition(&transition);
    }

    fn save_screenshot(&self, frame: &Frame, now: DateTime<Local>) {
        let path = screenshot_path(&self.screenshot_dir, now);
        match self.image_writer.write(&path, frame) {
            Ok(()) => log::info!("Saved screenshot {}", path.display()),
            Err(e) => log::warn!("Failed to save screenshot {}: {e}", path.display()),
        }
    }

    fn update_recording(&mut self, enabled: bool, source_size: (u32, u32), now: DateTime<Local>) {
        if !enabled {
            self.start_failed = false;
        } else if self.start_failed {
            return;
        }

        let path = recording_path(&self.video_dir, now);
        let fps = self.fps;
        let factory = &mut self.writer_factory;
        let transition = self.recording.on_toggle(enabled, || {
            RecordingSession::start(factory(), path, source_size, fps)
        });
        if matches!(transition, RecordingTransition::StartFailed(_)) {
            self.start_failed = true;
        }
        log_transition(&transition);
    }
}

impl Drop for CaptureManager {
    fn drop(&mut self) {
        self.finish();
    }
}

fn log_transition(transition: &RecordingTransition) {
    match transition {
        RecordingTransition::Unchanged => {}
        RecordingTransition::Started(path) => log::info!("Recording to {}", path.display()),
        RecordingTransition::StartFailed(reason) => {
            log::warn!("Failed to start recording: {reason}")
        }
        RecordingTransition::Stopped { path, frames } => {
            log::info!("Recording finished: {} ({frames} frames)", path.display())
        }
        RecordingTransition::StopFailed { path, reason } => {
            log::warn!("Recording {} did not finalize cleanly: {reason}", path.display())
        }
    }
}
