use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use thiserror::Error;

use crate::annotation::overlay::Overlay;
use crate::pipeline::capture_manager::CaptureManager;
use crate::pipeline::face_recognition_stage::FaceRecognitionStage;
use crate::pipeline::marker_tracking_stage::MarkerTrackingStage;
use crate::pipeline::pipeline_logger::{NullPipelineLogger, PipelineLogger};
use crate::pipeline::toggles::PipelineToggles;
use crate::shared::clock::{Clock, SystemClock};
use crate::shared::constants::{DISPLAY_HEIGHT, DISPLAY_WIDTH};
use crate::shared::frame::Frame;
use crate::video::domain::video_source::{SourceError, VideoSource};
use crate::video::infrastructure::cancellable_source::CancellableSource;

/// What the pipeline tells the display side.
#[derive(Debug)]
pub enum PipelineEvent {
    /// Sent once per run: whether the source opened.
    SourceReady(bool),
    /// One annotated frame, scaled to the display size.
    Frame(Frame),
    /// The stream failed or ended mid-run. Recordings are already closed.
    SourceLost(String),
    /// The run ended on a stop request.
    Stopped,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("video source unavailable: {0}")]
    SourceUnavailable(#[source] SourceError),
}

/// Why a run that got past startup ended.
#[derive(Debug, PartialEq)]
pub enum RunOutcome {
    Stopped,
    SourceLost(SourceError),
    /// Nobody is listening for frames anymore.
    Disconnected,
}

/// The per-frame driver.
///
/// Each iteration reads one frame, draws markers then faces on a copy,
/// hands both copies to the capture manager, and publishes the annotated
/// copy. Stages that could not be built (missing calibration, missing
/// models) are simply absent; their toggles are ignored.
pub struct FramePipeline {
    url: String,
    read_timeout: Option<Duration>,
    display_size: (u32, u32),
    toggles: Arc<PipelineToggles>,
    stop: Arc<AtomicBool>,
    marker_stage: Option<MarkerTrackingStage>,
    face_stage: Option<FaceRecognitionStage>,
    capture: CaptureManager,
    overlay: Overlay,
    clock: Box<dyn Clock>,
    logger: Box<dyn PipelineLogger>,
    events: Sender<PipelineEvent>,
    warned_unavailable: (bool, bool),
}

impl FramePipeline {
    pub fn new(url: impl Into<String>, capture: CaptureManager, events: Sender<PipelineEvent>) -> Self {
        Self {
            url: url.into(),
            read_timeout: None,
            display_size: (DISPLAY_WIDTH, DISPLAY_HEIGHT),
            toggles: Arc::new(PipelineToggles::new()),
            stop: Arc::new(AtomicBool::new(false)),
            marker_stage: None,
            face_stage: None,
            capture,
            overlay: Overlay::new(None),
            clock: Box::new(SystemClock::new()),
            logger: Box::new(NullPipelineLogger),
            events,
            warned_unavailable: (false, false),
        }
    }

    pub fn with_toggles(mut self, toggles: Arc<PipelineToggles>) -> Self {
        self.toggles = toggles;
        self
    }

    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_display_size(mut self, width: u32, height: u32) -> Self {
        self.display_size = (width.max(1), height.max(1));
        self
    }

    pub fn with_marker_stage(mut self, stage: Option<MarkerTrackingStage>) -> Self {
        self.marker_stage = stage;
        self
    }

    pub fn with_face_stage(mut self, stage: Option<FaceRecognitionStage>) -> Self {
        self.face_stage = stage;
        self
    }

    pub fn with_overlay(mut self, overlay: Overlay) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_logger(mut self, logger: Box<dyn PipelineLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn toggles(&self) -> &Arc<PipelineToggles> {
        &self.toggles
    }

    /// Opens the source and processes frames until it fails, the stop flag
    /// is set, or the event receiver goes away.
    ///
    /// An open failure sends `SourceReady(false)` and returns an error
    /// without processing anything. Every other ending closes any open
    /// recording before returning.
    pub fn run(&mut self, source: Box<dyn VideoSource>) -> Result<RunOutcome, PipelineError> {
        let mut stream = match CancellableSource::open(
            source,
            &self.url,
            self.read_timeout,
            self.stop.clone(),
        ) {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("{e}");
                let _ = self.events.send(PipelineEvent::SourceReady(false));
                return Err(PipelineError::SourceUnavailable(e));
            }
        };
        let metadata = stream.metadata();
        log::info!(
            "Connected to {} ({}x{}, {})",
            metadata.source,
            metadata.width,
            metadata.height,
            if metadata.codec.is_empty() { "unknown codec" } else { metadata.codec.as_str() }
        );
        let _ = self.events.send(PipelineEvent::SourceReady(true));

        let outcome = loop {
            match stream.next_frame() {
                Ok(frame) => {
                    if !self.step(frame, stream.resolution()) {
                        break RunOutcome::Disconnected;
                    }
                }
                Err(SourceError::Stopped) => break RunOutcome::Stopped,
                Err(e) => break RunOutcome::SourceLost(e),
            }
        };

        stream.stop();
        self.capture.finish();
        self.logger.summary();
        match &outcome {
            RunOutcome::Stopped => {
                log::info!("Pipeline stopped");
                let _ = self.events.send(PipelineEvent::Stopped);
            }
            RunOutcome::SourceLost(e) => {
                log::warn!("Lost video source: {e}");
                let _ = self.events.send(PipelineEvent::SourceLost(e.to_string()));
            }
            RunOutcome::Disconnected => log::info!("Display disconnected; pipeline exiting"),
        }
        Ok(outcome)
    }

    /// Processes one fetched frame and publishes it. Returns `false` when
    /// the event receiver is gone.
    pub fn step(&mut self, raw: Frame, source_size: (u32, u32)) -> bool {
        let toggles = self.toggles.snapshot();
        self.logger.frame(raw.index());
        let mut annotated = raw.clone();

        if toggles.marker_tracking {
            match self.marker_stage.as_mut() {
                Some(stage) => {
                    let t0 = Instant::now();
                    let gray = raw.to_grayscale();
                    stage.process(
                        &gray,
                        &mut annotated,
                        self.clock.monotonic_secs(),
                        &self.overlay,
                        self.logger.as_mut(),
                    );
                    self.logger
                        .timing("markers", t0.elapsed().as_secs_f64() * 1000.0);
                }
                None if !self.warned_unavailable.0 => {
                    log::warn!("Marker tracking requested but unavailable (no calibration)");
                    self.warned_unavailable.0 = true;
                }
                None => {}
            }
        }

        if toggles.face_recognition {
            match self.face_stage.as_mut() {
                Some(stage) => {
                    let t0 = Instant::now();
                    let report =
                        stage.process(&mut annotated, &raw, toggles.save_faces, &self.overlay);
                    self.logger
                        .timing("faces", t0.elapsed().as_secs_f64() * 1000.0);
                    if report.redetected {
                        self.logger.metric("faces", report.faces as f64);
                    }
                }
                None if !self.warned_unavailable.1 => {
                    log::warn!("Face recognition requested but unavailable (no models)");
                    self.warned_unavailable.1 = true;
                }
                None => {}
            }
        }

        let t0 = Instant::now();
        self.capture
            .capture(&toggles, &raw, &annotated, source_size, self.clock.wall_time());
        self.logger
            .timing("capture", t0.elapsed().as_secs_f64() * 1000.0);

        let (w, h) = self.display_size;
        self.events
            .send(PipelineEvent::Frame(annotated.fit_within(w, h)))
            .is_ok()
    }

    /// Asks a running `run` to return at its next frame wait.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
