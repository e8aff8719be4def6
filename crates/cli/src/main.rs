use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use robocam_core::annotation::label_font::resolve_font;
use robocam_core::annotation::overlay::Overlay;
use robocam_core::detection::domain::calibration::CameraCalibration;
use robocam_core::detection::domain::known_faces::{FaceMatcher, KnownFaceRegistry};
use robocam_core::detection::domain::marker_tracker::MarkerTracker;
use robocam_core::detection::infrastructure::calibration_loader::load_calibration;
use robocam_core::detection::infrastructure::onnx_face_encoder::OnnxFaceEncoder;
use robocam_core::detection::infrastructure::registry_loader::load_registry;
use robocam_core::detection::infrastructure::square_marker_detector::SquareMarkerDetector;
use robocam_core::pipeline::capture_manager::CaptureManager;
use robocam_core::pipeline::face_recognition_stage::{FaceCropSink, FaceRecognitionStage};
use robocam_core::pipeline::frame_pipeline::{FramePipeline, PipelineEvent, RunOutcome};
use robocam_core::pipeline::infrastructure::pipeline_worker::{self, PipelineWorker};
use robocam_core::pipeline::marker_tracking_stage::MarkerTrackingStage;
use robocam_core::pipeline::pipeline_logger::LogPipelineLogger;
use robocam_core::pipeline::settings::PipelineSettings;
use robocam_core::pipeline::toggles::{PipelineToggles, TOGGLE_NAMES};
use robocam_core::shared::constants::{
    FACE_DETECTOR_MODEL_NAME, FACE_DETECTOR_MODEL_URL, FACE_EMBEDDING_MODEL_NAME,
    FACE_EMBEDDING_MODEL_URL,
};
use robocam_core::shared::model_resolver;
use robocam_core::video::domain::video_writer::VideoWriter;
use robocam_core::video::infrastructure::ffmpeg_stream_source::FfmpegStreamSource;
use robocam_core::video::infrastructure::ffmpeg_writer::FfmpegWriter;
use robocam_core::video::infrastructure::image_file_writer::ImageFileWriter;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const EVENT_POLL: Duration = Duration::from_millis(200);
const FRAME_REPORT_EVERY: usize = 100;

/// Headless operator console: streams the robot camera through the
/// perception pipeline. Toggles are switched by typing commands on stdin.
#[derive(Parser)]
#[command(name = "robocam")]
struct Cli {
    /// JSON settings file. Flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Camera stream URL.
    #[arg(long)]
    url: Option<String>,

    /// Camera calibration (OpenCV YAML or JSON).
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Known-face listing, one `name image-file` pair per line.
    #[arg(long)]
    faces_file: Option<PathBuf>,

    /// Root directory for Screenshots/, Videos/ and Faces/Unknown/.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Directory searched for the ONNX face models before downloading.
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// TrueType font for overlay labels.
    #[arg(long)]
    font: Option<PathBuf>,

    /// Give up on a silent stream after this many milliseconds (0 = never).
    #[arg(long)]
    read_timeout_ms: Option<u64>,

    /// Reconnect whenever the stream fails instead of exiting.
    #[arg(long)]
    reconnect: bool,

    /// Start with face recognition on.
    #[arg(long)]
    faces: bool,

    /// Start with marker tracking on.
    #[arg(long)]
    markers: bool,

    /// Start recording immediately.
    #[arg(long)]
    record: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    validate(&settings)?;

    let toggles = Arc::new(PipelineToggles::new());
    toggles.set_face_recognition(cli.faces);
    toggles.set_marker_tracking(cli.markers);
    toggles.set_recording(cli.record);

    let mut perception = Perception::load(&settings);
    let crop_counter = Arc::new(AtomicU64::new(0));
    let quit = Arc::new(AtomicBool::new(false));
    spawn_command_reader(toggles.clone(), quit.clone());

    loop {
        let source = match settings.read_timeout() {
            Some(timeout) => FfmpegStreamSource::new().with_io_timeout(timeout),
            None => FfmpegStreamSource::new(),
        };
        let (events, worker) = pipeline_worker::spawn(
            |tx| build_pipeline(tx, &settings, &mut perception, &toggles, &crop_counter),
            Box::new(source),
        );
        watch(&events, &worker, &quit);

        let retry = match worker.join() {
            Some(Ok(RunOutcome::SourceLost(_))) => cli.reconnect,
            Some(Ok(RunOutcome::Stopped | RunOutcome::Disconnected)) => false,
            Some(Err(e)) if cli.reconnect => {
                log::warn!("{e}");
                true
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Err("pipeline worker panicked".into()),
        };
        if !retry || quit.load(Ordering::Relaxed) {
            return Ok(());
        }
        log::info!("Reconnecting in {}s", RECONNECT_DELAY.as_secs());
        thread::sleep(RECONNECT_DELAY);
        if quit.load(Ordering::Relaxed) {
            return Ok(());
        }
    }
}

fn load_settings(cli: &Cli) -> Result<PipelineSettings, Box<dyn std::error::Error>> {
    let mut settings = match &cli.config {
        Some(path) => PipelineSettings::load(path)?,
        None => PipelineSettings::default(),
    };
    if let Some(url) = &cli.url {
        settings.stream_url = url.clone();
    }
    if let Some(path) = &cli.calibration {
        settings.calibration_path = path.clone();
    }
    if let Some(path) = &cli.faces_file {
        settings.known_faces_file = path.clone();
    }
    if let Some(dir) = &cli.output_dir {
        settings.output_dir = dir.clone();
    }
    if let Some(dir) = &cli.models_dir {
        settings.models_dir = Some(dir.clone());
    }
    if let Some(font) = &cli.font {
        settings.label_font = Some(font.clone());
    }
    if let Some(ms) = cli.read_timeout_ms {
        settings.read_timeout_ms = ms;
    }
    Ok(settings)
}

fn validate(settings: &PipelineSettings) -> Result<(), Box<dyn std::error::Error>> {
    if settings.marker_length_m.is_nan() || settings.marker_length_m <= 0.0 {
        return Err(format!(
            "Marker length must be positive, got {}",
            settings.marker_length_m
        )
        .into());
    }
    if settings.match_tolerance.is_nan() || settings.match_tolerance <= 0.0 {
        return Err(format!(
            "Match tolerance must be positive, got {}",
            settings.match_tolerance
        )
        .into());
    }
    if !(0.0..=1.0).contains(&settings.face_confidence) {
        return Err(format!(
            "Face confidence must be between 0.0 and 1.0, got {}",
            settings.face_confidence
        )
        .into());
    }
    if settings.face_redetect_interval == 0 {
        return Err("Face re-detection interval must be at least 1".into());
    }
    if settings.recording_fps == 0 {
        return Err("Recording fps must be at least 1".into());
    }
    Ok(())
}

/// Perception inputs loaded once and reused for every connection.
struct Perception {
    calibration: Option<CameraCalibration>,
    faces: Option<FaceAssets>,
}

struct FaceAssets {
    detector_model: PathBuf,
    embedding_model: PathBuf,
    registry: KnownFaceRegistry,
    // The encoder used for the registry serves the first connection.
    spare_encoder: Option<OnnxFaceEncoder>,
}

impl Perception {
    fn load(settings: &PipelineSettings) -> Self {
        let calibration = match load_calibration(&settings.calibration_path) {
            Ok(c) => Some(c),
            Err(e) => {
                log::error!("Marker tracking disabled: {e}");
                None
            }
        };
        let faces = match load_face_assets(settings) {
            Ok(assets) => Some(assets),
            Err(e) => {
                log::error!("Face recognition disabled: {e}");
                None
            }
        };
        Self { calibration, faces }
    }
}

fn load_face_assets(settings: &PipelineSettings) -> Result<FaceAssets, Box<dyn std::error::Error>> {
    let models_dir = settings.models_dir.as_deref();
    let detector_model = model_resolver::resolve(
        FACE_DETECTOR_MODEL_NAME,
        FACE_DETECTOR_MODEL_URL,
        models_dir,
        Some(Box::new(download_progress)),
    )?;
    let embedding_model = model_resolver::resolve(
        FACE_EMBEDDING_MODEL_NAME,
        FACE_EMBEDDING_MODEL_URL,
        models_dir,
        Some(Box::new(download_progress)),
    )?;

    let mut encoder =
        OnnxFaceEncoder::new(&detector_model, &embedding_model, settings.face_confidence)?;
    let registry = match load_registry(&settings.known_faces_file, &mut encoder) {
        Ok(registry) => registry,
        Err(e) => {
            log::warn!("{e}; every face will be labelled Unknown");
            KnownFaceRegistry::default()
        }
    };

    Ok(FaceAssets {
        detector_model,
        embedding_model,
        registry,
        spare_encoder: Some(encoder),
    })
}

fn build_pipeline(
    tx: Sender<PipelineEvent>,
    settings: &PipelineSettings,
    perception: &mut Perception,
    toggles: &Arc<PipelineToggles>,
    crop_counter: &Arc<AtomicU64>,
) -> FramePipeline {
    let writer_factory = Box::new(|| Box::new(FfmpegWriter::new()) as Box<dyn VideoWriter>);
    let capture = CaptureManager::new(
        settings.screenshot_dir(),
        settings.video_dir(),
        settings.recording_fps,
        Box::new(ImageFileWriter::new()),
        writer_factory,
    );

    let marker_stage = perception.calibration.clone().map(|calibration| {
        MarkerTrackingStage::new(
            Box::new(SquareMarkerDetector::default()),
            calibration,
            settings.marker_length_m,
            MarkerTracker::new(settings.marker_timeout_secs),
        )
    });
    let face_stage = perception
        .faces
        .as_mut()
        .and_then(|assets| build_face_stage(assets, settings, crop_counter));

    FramePipeline::new(settings.stream_url.clone(), capture, tx)
        .with_toggles(toggles.clone())
        .with_read_timeout(settings.read_timeout())
        .with_display_size(settings.display_width, settings.display_height)
        .with_marker_stage(marker_stage)
        .with_face_stage(face_stage)
        .with_overlay(Overlay::new(resolve_font(settings.label_font.as_deref())))
        .with_logger(Box::new(LogPipelineLogger::default()))
}

fn build_face_stage(
    assets: &mut FaceAssets,
    settings: &PipelineSettings,
    crop_counter: &Arc<AtomicU64>,
) -> Option<FaceRecognitionStage> {
    let encoder = match assets.spare_encoder.take() {
        Some(encoder) => encoder,
        None => match OnnxFaceEncoder::new(
            &assets.detector_model,
            &assets.embedding_model,
            settings.face_confidence,
        ) {
            Ok(encoder) => encoder,
            Err(e) => {
                log::error!("Face recognition disabled: {e}");
                return None;
            }
        },
    };
    let crops = FaceCropSink {
        dir: settings.face_crop_dir(),
        writer: Arc::new(ImageFileWriter::new()),
        counter: crop_counter.clone(),
    };
    let stage = FaceRecognitionStage::new(
        Box::new(encoder),
        assets.registry.clone(),
        FaceMatcher::new(settings.match_tolerance),
        crops,
    )
    .with_interval(settings.face_redetect_interval);
    Some(stage)
}

/// Drains pipeline events until the worker's sender goes away.
fn watch(events: &Receiver<PipelineEvent>, worker: &PipelineWorker, quit: &AtomicBool) {
    let mut frames = 0usize;
    loop {
        match events.recv_timeout(EVENT_POLL) {
            Ok(PipelineEvent::SourceReady(true)) => log::info!("Stream ready"),
            Ok(PipelineEvent::SourceReady(false)) => log::warn!("Stream not ready"),
            Ok(PipelineEvent::Frame(frame)) => {
                frames += 1;
                if frames % FRAME_REPORT_EVERY == 0 {
                    log::debug!(
                        "Displayed {frames} frames ({}x{})",
                        frame.width(),
                        frame.height()
                    );
                }
            }
            Ok(PipelineEvent::SourceLost(reason)) => log::warn!("Stream lost: {reason}"),
            Ok(PipelineEvent::Stopped) => {}
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
        if quit.load(Ordering::Relaxed) {
            worker.stop();
        }
    }
}

#[derive(Debug, PartialEq)]
enum Command {
    Flip(String),
    Set(String, bool),
    Status,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        ["quit" | "exit" | "q"] => Some(Command::Quit),
        ["status"] => Some(Command::Status),
        ["help" | "?"] => Some(Command::Help),
        ["on", name] => Some(Command::Set((*name).to_string(), true)),
        ["off", name] => Some(Command::Set((*name).to_string(), false)),
        [name] => Some(Command::Flip((*name).to_string())),
        _ => None,
    }
}

/// Stands in for the console's buttons: each stdin line flips or sets a
/// toggle. End of input leaves the pipeline running.
fn spawn_command_reader(toggles: Arc<PipelineToggles>, quit: Arc<AtomicBool>) {
    let spawned = thread::Builder::new()
        .name("commands".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Some(Command::Quit) => {
                        quit.store(true, Ordering::Relaxed);
                        break;
                    }
                    Some(Command::Status) => eprintln!("{:?}", toggles.snapshot()),
                    Some(Command::Help) | None => print_help(),
                    Some(Command::Flip(name)) => match toggles.toggle_by_name(&name) {
                        Some(on) => eprintln!("{name}: {}", if on { "on" } else { "off" }),
                        None => print_help(),
                    },
                    Some(Command::Set(name, on)) => {
                        if !toggles.set_by_name(&name, on) {
                            print_help();
                        }
                    }
                }
            }
        });
    if let Err(e) = spawned {
        log::warn!("Commands unavailable: {e}");
    }
}

fn print_help() {
    eprintln!(
        "Commands: <toggle> | on <toggle> | off <toggle> | status | quit\nToggles: {}",
        TOGGLE_NAMES.join(", ")
    );
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading face model... {pct}%");
        if downloaded >= total {
            eprintln!();
        }
    } else {
        eprint!("\rDownloading face model... {downloaded} bytes");
    }
}
