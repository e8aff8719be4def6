use std::time::Duration;

use crate::shared::frame::Frame;
use crate::shared::video_metadata::VideoMetadata;
use crate::video::domain::video_source::VideoSource;

/// Decodes a network stream (MJPEG over HTTP, RTSP, or a local file) via
/// ffmpeg-next and converts every frame to RGB24.
///
/// The RGB scaler is rebuilt whenever the decoded size or pixel format
/// changes, so mid-stream resolution switches are tolerated.
pub struct FfmpegStreamSource {
    input_ctx: Option<ffmpeg_next::format::context::Input>,
    decoder: Option<ffmpeg_next::decoder::Video>,
    scaler: Option<ScalerState>,
    video_stream_index: usize,
    io_timeout: Option<Duration>,
    resolution: Option<(u32, u32)>,
    frame_index: usize,
    draining: bool,
}

struct ScalerState {
    context: ffmpeg_next::software::scaling::Context,
    key: (ffmpeg_next::format::Pixel, u32, u32),
}

// Safety: FfmpegStreamSource is only used from a single thread at a time.
// The raw pointers inside ffmpeg types are not shared across threads.
unsafe impl Send for FfmpegStreamSource {}

impl FfmpegStreamSource {
    pub fn new() -> Self {
        Self {
            input_ctx: None,
            decoder: None,
            scaler: None,
            video_stream_index: 0,
            io_timeout: None,
            resolution: None,
            frame_index: 0,
            draining: false,
        }
    }

    /// Makes ffmpeg's own socket reads fail after `timeout` instead of
    /// blocking forever on a dead connection.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    fn open_options(&self) -> ffmpeg_next::Dictionary<'static> {
        let mut options = ffmpeg_next::Dictionary::new();
        if let Some(timeout) = self.io_timeout {
            options.set("rw_timeout", &timeout.as_micros().to_string());
        }
        options
    }

    fn try_receive(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>> {
        let decoder = self.decoder.as_mut().ok_or("FfmpegStreamSource: not opened")?;
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        if decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }

        let key = (decoded.format(), decoded.width(), decoded.height());
        if self.scaler.as_ref().map(|s| s.key) != Some(key) {
            let context = ffmpeg_next::software::scaling::Context::get(
                key.0,
                key.1,
                key.2,
                ffmpeg_next::format::Pixel::RGB24,
                key.1,
                key.2,
                ffmpeg_next::software::scaling::Flags::BILINEAR,
            )?;
            if self.resolution.is_some_and(|r| r != (key.1, key.2)) {
                log::info!("Stream resolution changed to {}x{}", key.1, key.2);
            }
            self.scaler = Some(ScalerState { context, key });
        }

        let mut rgb_frame = ffmpeg_next::util::frame::video::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.context.run(&decoded, &mut rgb_frame)?;
        }

        let (width, height) = (key.1, key.2);
        let pixels = extract_rgb_pixels(&rgb_frame, width, height);
        let frame = Frame::new(pixels, width, height, 3, self.frame_index);
        self.frame_index += 1;
        self.resolution = Some((width, height));
        Ok(Some(frame))
    }
}

impl Default for FfmpegStreamSource {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoSource for FfmpegStreamSource {
    fn open(&mut self, url: &str) -> Result<VideoMetadata, Box<dyn std::error::Error>> {
        ffmpeg_next::init()?;
        ffmpeg_next::format::network::init();

        let ictx = ffmpeg_next::format::input_with_dictionary(&url, self.open_options())?;
        let stream = ictx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or("No video stream found")?;

        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = codec_ctx.decoder().video()?;

        let rate = stream.avg_frame_rate();
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };

        let metadata = VideoMetadata {
            width: decoder.width(),
            height: decoder.height(),
            fps,
            codec: decoder
                .codec()
                .map(|c| c.name().to_string())
                .unwrap_or_default(),
            source: url.to_string(),
        };

        self.video_stream_index = stream.index();
        self.resolution = (metadata.width > 0 && metadata.height > 0)
            .then_some((metadata.width, metadata.height));
        self.decoder = Some(decoder);
        self.input_ctx = Some(ictx);
        self.scaler = None;
        self.frame_index = 0;
        self.draining = false;

        Ok(metadata)
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>> {
        loop {
            if let Some(frame) = self.try_receive()? {
                return Ok(Some(frame));
            }
            if self.draining {
                return Ok(None);
            }

            let ictx = self
                .input_ctx
                .as_mut()
                .ok_or("FfmpegStreamSource: not opened")?;
            let decoder = self
                .decoder
                .as_mut()
                .ok_or("FfmpegStreamSource: not opened")?;

            let mut packet = ffmpeg_next::Packet::empty();
            match packet.read(ictx) {
                Ok(()) => {
                    if packet.stream() != self.video_stream_index {
                        continue;
                    }
                    if let Err(e) = decoder.send_packet(&packet) {
                        log::debug!("Dropping undecodable packet: {e}");
                    }
                }
                Err(ffmpeg_next::Error::Eof) => {
                    let _ = decoder.send_eof();
                    self.draining = true;
                }
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    continue;
                }
                Err(e) => return Err(Box::new(e)),
            }
        }
    }

    fn resolution(&self) -> Option<(u32, u32)> {
        self.resolution
    }

    fn close(&mut self) {
        self.scaler = None;
        self.decoder = None;
        self.input_ctx = None;
    }
}

/// Copies pixel data from an ffmpeg frame into a contiguous RGB buffer.
///
/// ffmpeg frames may have padding bytes at the end of each row (stride > width*3).
fn extract_rgb_pixels(
    rgb_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let w = width as usize;
    let h = height as usize;

    let mut pixels = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + w * 3]);
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::domain::video_writer::VideoWriter;
    use crate::video::infrastructure::ffmpeg_writer::FfmpegWriter;

    fn write_clip(path: &std::path::Path, frames: usize, width: u32, height: u32) {
        let mut writer = FfmpegWriter::new();
        let metadata = VideoMetadata {
            width,
            height,
            fps: 20.0,
            codec: String::new(),
            source: String::new(),
        };
        writer.open(path, &metadata).unwrap();
        for i in 0..frames {
            let value = (i * 40 % 256) as u8;
            let frame = Frame::new(vec![value; (width * height * 3) as usize], width, height, 3, i);
            writer.write(&frame).unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn test_read_before_open_errors() {
        let mut source = FfmpegStreamSource::new();
        assert!(source.read_frame().is_err());
        assert_eq!(source.resolution(), None);
    }

    #[test]
    fn test_open_missing_file_errors() {
        let mut source = FfmpegStreamSource::new();
        assert!(source.open("/nonexistent/stream.avi").is_err());
    }

    #[test]
    fn test_reads_every_frame_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.avi");
        write_clip(&path, 5, 64, 48);

        let mut source = FfmpegStreamSource::new();
        let metadata = source.open(path.to_str().unwrap()).unwrap();
        assert_eq!((metadata.width, metadata.height), (64, 48));

        let mut count = 0;
        while let Some(frame) = source.read_frame().unwrap() {
            assert_eq!(frame.size(), (64, 48));
            assert_eq!(frame.index(), count);
            count += 1;
        }
        assert_eq!(count, 5);
        assert_eq!(source.resolution(), Some((64, 48)));
    }

    #[test]
    fn test_io_timeout_sets_open_option() {
        let source = FfmpegStreamSource::new().with_io_timeout(Duration::from_millis(1500));
        let options = source.open_options();
        assert_eq!(options.get("rw_timeout"), Some("1500000"));
    }
}
