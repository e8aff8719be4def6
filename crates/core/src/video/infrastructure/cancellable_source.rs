use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::video_source::{SourceError, VideoSource};

const CHANNEL_CAPACITY: usize = 2;

/// How often a blocked `next_frame` re-checks the stop flag.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

type FrameResult = Result<Frame, String>;

/// Runs a blocking [`VideoSource`] on its own reader thread so the caller
/// can wait for frames with a deadline and abandon the stream on request.
///
/// Layout: `reader thread → bounded channel → next_frame()`
///
/// The reader thread owns the source and closes it when it exits, which
/// happens on end of stream, on a read error, once the stop flag is set, or
/// when this handle is dropped.
pub struct CancellableSource {
    frames: Receiver<FrameResult>,
    stop: Arc<AtomicBool>,
    metadata: VideoMetadata,
    resolution: (u32, u32),
    read_timeout: Option<Duration>,
    reader: Option<JoinHandle<()>>,
}

impl CancellableSource {
    /// Opens `url` on the calling thread, then hands the source to a reader
    /// thread. `stop` is shared with whoever may cancel the stream.
    pub fn open(
        mut source: Box<dyn VideoSource>,
        url: &str,
        read_timeout: Option<Duration>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, SourceError> {
        let metadata = source.open(url).map_err(|e| SourceError::Open {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let resolution = source
            .resolution()
            .unwrap_or((metadata.width, metadata.height));

        let (tx, rx) = crossbeam_channel::bounded::<FrameResult>(CHANNEL_CAPACITY);
        let thread_stop = stop.clone();
        let reader = std::thread::Builder::new()
            .name("video-reader".into())
            .spawn(move || {
                while !thread_stop.load(Ordering::Relaxed) {
                    let item = match source.read_frame() {
                        Ok(Some(frame)) => Ok(frame),
                        Ok(None) => break,
                        Err(e) => Err(e.to_string()),
                    };
                    let failed = item.is_err();
                    if tx.send(item).is_err() || failed {
                        break;
                    }
                }
                source.close();
            })
            .map_err(|e| SourceError::Open {
                url: url.to_string(),
                reason: format!("failed to spawn reader thread: {e}"),
            })?;

        Ok(Self {
            frames: rx,
            stop,
            metadata,
            resolution,
            read_timeout,
            reader: Some(reader),
        })
    }

    pub fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    /// Resolution of the last frame handed out (or the opened stream's).
    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    /// Waits for the next decoded frame.
    ///
    /// Fails with `Stopped` as soon as the stop flag is observed, with
    /// `Timeout` when no frame arrives within the read timeout, and with
    /// `Ended`/`Read` when the reader thread finishes.
    pub fn next_frame(&mut self) -> Result<Frame, SourceError> {
        let started = Instant::now();
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Err(SourceError::Stopped);
            }

            let wait = match self.read_timeout {
                Some(limit) => {
                    let elapsed = started.elapsed();
                    if elapsed >= limit {
                        return Err(SourceError::Timeout(limit));
                    }
                    STOP_POLL_INTERVAL.min(limit - elapsed)
                }
                None => STOP_POLL_INTERVAL,
            };

            match self.frames.recv_timeout(wait) {
                Ok(Ok(frame)) => {
                    self.resolution = frame.size();
                    return Ok(frame);
                }
                Ok(Err(reason)) => return Err(SourceError::Read(reason)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(SourceError::Ended),
            }
        }
    }

    /// Signals the reader thread to release the source.
    ///
    /// Joins the thread only if it has already finished; a reader stuck in
    /// a blocking read exits on its own once that read returns.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            if handle.is_finished() {
                if handle.join().is_err() {
                    log::warn!("Video reader thread panicked");
                }
            } else {
                log::debug!("Video reader still blocked in read; detaching");
            }
        }
    }
}

impl Drop for CancellableSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedSource {
        frames: Vec<Frame>,
        fail_after: bool,
        closed: Arc<Mutex<bool>>,
        delay: Duration,
    }

    impl ScriptedSource {
        fn new(count: usize) -> Self {
            Self {
                frames: (0..count)
                    .map(|i| Frame::new(vec![0; 4 * 4 * 3], 4, 4, 3, i))
                    .rev()
                    .collect(),
                fail_after: false,
                closed: Arc::new(Mutex::new(false)),
                delay: Duration::ZERO,
            }
        }
    }

    impl VideoSource for ScriptedSource {
        fn open(&mut self, url: &str) -> Result<VideoMetadata, Box<dyn std::error::Error>> {
            if url == "bad" {
                return Err("connection refused".into());
            }
            Ok(VideoMetadata {
                width: 4,
                height: 4,
                fps: 20.0,
                codec: "mjpeg".into(),
                source: url.into(),
            })
        }

        fn read_frame(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>> {
            std::thread::sleep(self.delay);
            match self.frames.pop() {
                Some(f) => Ok(Some(f)),
                None if self.fail_after => Err("socket reset".into()),
                None => Ok(None),
            }
        }

        fn resolution(&self) -> Option<(u32, u32)> {
            Some((4, 4))
        }

        fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    fn flag() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn test_open_failure_is_reported() {
        let result = CancellableSource::open(Box::new(ScriptedSource::new(1)), "bad", None, flag());
        assert!(matches!(result, Err(SourceError::Open { .. })));
    }

    #[test]
    fn test_frames_then_ended() {
        let source = ScriptedSource::new(3);
        let closed = source.closed.clone();
        let mut stream = CancellableSource::open(Box::new(source), "ok", None, flag()).unwrap();

        for i in 0..3 {
            assert_eq!(stream.next_frame().unwrap().index(), i);
        }
        assert_eq!(stream.next_frame(), Err(SourceError::Ended));
        assert!(*closed.lock().unwrap());
    }

    #[test]
    fn test_read_error_is_forwarded() {
        let mut source = ScriptedSource::new(1);
        source.fail_after = true;
        let mut stream = CancellableSource::open(Box::new(source), "ok", None, flag()).unwrap();

        assert!(stream.next_frame().is_ok());
        assert!(matches!(stream.next_frame(), Err(SourceError::Read(_))));
    }

    #[test]
    fn test_timeout_when_source_stalls() {
        let mut source = ScriptedSource::new(1);
        source.delay = Duration::from_secs(2);
        let mut stream = CancellableSource::open(
            Box::new(source),
            "ok",
            Some(Duration::from_millis(150)),
            flag(),
        )
        .unwrap();

        assert!(matches!(stream.next_frame(), Err(SourceError::Timeout(_))));
    }

    #[test]
    fn test_stop_flag_interrupts_wait() {
        let mut source = ScriptedSource::new(1);
        source.delay = Duration::from_secs(2);
        let stop = flag();
        let mut stream =
            CancellableSource::open(Box::new(source), "ok", None, stop.clone()).unwrap();

        stop.store(true, Ordering::Relaxed);
        assert_eq!(stream.next_frame(), Err(SourceError::Stopped));
    }

    #[test]
    fn test_resolution_tracks_latest_frame() {
        let mut source = ScriptedSource::new(0);
        source.frames = vec![Frame::new(vec![0; 8 * 2 * 3], 8, 2, 3, 0)];
        let mut stream = CancellableSource::open(Box::new(source), "ok", None, flag()).unwrap();

        assert_eq!(stream.resolution(), (4, 4));
        stream.next_frame().unwrap();
        assert_eq!(stream.resolution(), (8, 2));
    }
}
