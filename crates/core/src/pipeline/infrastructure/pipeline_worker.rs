use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::pipeline::frame_pipeline::{FramePipeline, PipelineError, PipelineEvent, RunOutcome};
use crate::video::domain::video_source::VideoSource;

type RunResult = Result<RunOutcome, PipelineError>;

/// Handle to a pipeline running on its own thread.
///
/// Dropping the handle stops the pipeline and waits for it to finish, so
/// any recording is closed before the caller moves on.
pub struct PipelineWorker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<RunResult>>,
}

impl PipelineWorker {
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the run to end. `None` if the worker panicked.
    pub fn join(mut self) -> Option<RunResult> {
        self.handle.take().and_then(join_logged)
    }
}

impl Drop for PipelineWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop();
            join_logged(handle);
        }
    }
}

fn join_logged(handle: JoinHandle<RunResult>) -> Option<RunResult> {
    match handle.join() {
        Ok(result) => Some(result),
        Err(_) => {
            log::error!("Pipeline worker panicked");
            None
        }
    }
}

/// Starts a pipeline on a dedicated thread.
///
/// `build` receives the event sender and returns the configured pipeline;
/// it runs on the calling thread. The worker owns its own stop flag, which
/// replaces any flag `build` installed.
pub fn spawn<F>(build: F, source: Box<dyn VideoSource>) -> (Receiver<PipelineEvent>, PipelineWorker)
where
    F: FnOnce(Sender<PipelineEvent>) -> FramePipeline,
{
    let (tx, rx) = crossbeam_channel::unbounded::<PipelineEvent>();
    let stop = Arc::new(AtomicBool::new(false));
    let mut pipeline = build(tx).with_stop_flag(stop.clone());

    let handle = thread::Builder::new()
        .name("frame-pipeline".into())
        .spawn(move || pipeline.run(source));

    let handle = match handle {
        Ok(handle) => Some(handle),
        Err(e) => {
            log::error!("Failed to start pipeline thread: {e}");
            None
        }
    };

    (rx, PipelineWorker { stop, handle })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::capture_manager::tests::{stub_factory, WriterLog};
    use crate::pipeline::capture_manager::CaptureManager;
    use crate::shared::frame::Frame;
    use crate::shared::video_metadata::VideoMetadata;
    use crate::video::infrastructure::image_file_writer::ImageFileWriter;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Never-ending 16x16 stream, one frame every few milliseconds.
    struct EndlessSource {
        index: usize,
    }

    impl VideoSource for EndlessSource {
        fn open(&mut self, url: &str) -> Result<VideoMetadata, Box<dyn std::error::Error>> {
            if url.is_empty() {
                return Err("no url".into());
            }
            Ok(VideoMetadata {
                width: 16,
                height: 16,
                fps: 20.0,
                codec: String::new(),
                source: url.into(),
            })
        }

        fn read_frame(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>> {
            thread::sleep(Duration::from_millis(5));
            self.index += 1;
            Ok(Some(Frame::new(vec![0; 16 * 16 * 3], 16, 16, 3, self.index)))
        }

        fn resolution(&self) -> Option<(u32, u32)> {
            Some((16, 16))
        }

        fn close(&mut self) {}
    }

    fn builder(
        url: &'static str,
        dir: &std::path::Path,
        log: Arc<Mutex<WriterLog>>,
    ) -> impl FnOnce(Sender<PipelineEvent>) -> FramePipeline {
        let capture = CaptureManager::new(
            dir.join("Screenshots"),
            dir.join("Videos"),
            20,
            Box::new(ImageFileWriter::new()),
            stub_factory(log),
        );
        move |tx| FramePipeline::new(url, capture, tx)
    }

    #[test]
    fn test_worker_streams_frames_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(WriterLog::default()));
        let (rx, worker) = spawn(
            builder("stub://cam", dir.path(), log),
            Box::new(EndlessSource { index: 0 }),
        );

        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            PipelineEvent::SourceReady(true)
        ));
        for _ in 0..3 {
            assert!(matches!(
                rx.recv_timeout(Duration::from_secs(5)).unwrap(),
                PipelineEvent::Frame(_)
            ));
        }

        worker.stop();
        let result = worker.join().unwrap();
        assert_eq!(result.unwrap(), RunOutcome::Stopped);
        assert!(rx.iter().any(|e| matches!(e, PipelineEvent::Stopped)));
    }

    #[test]
    fn test_worker_reports_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(WriterLog::default()));
        let (rx, worker) = spawn(
            builder("", dir.path(), log),
            Box::new(EndlessSource { index: 0 }),
        );

        let result = worker.join().unwrap();
        assert!(matches!(result, Err(PipelineError::SourceUnavailable(_))));
        assert!(matches!(rx.recv().unwrap(), PipelineEvent::SourceReady(false)));
    }

    #[test]
    fn test_dropping_worker_closes_recording() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(WriterLog::default()));
        let toggles = Arc::new(crate::pipeline::toggles::PipelineToggles::new());
        toggles.set_recording(true);
        let build = builder("stub://cam", dir.path(), log.clone());
        let shared = toggles.clone();
        let (rx, worker) = spawn(
            move |tx| build(tx).with_toggles(shared),
            Box::new(EndlessSource { index: 0 }),
        );

        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        drop(worker);

        let log = log.lock().unwrap();
        assert_eq!(log.opened.len(), 1);
        assert_eq!(log.closes, 1);
    }
}
