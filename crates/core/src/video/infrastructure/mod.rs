pub mod cancellable_source;
pub mod ffmpeg_stream_source;
pub mod ffmpeg_writer;
pub mod image_file_writer;
