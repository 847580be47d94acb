//! FFmpeg/FFprobe video decode and encode.

mod command;
mod probe;
mod stream;

pub use command::{check_ffmpeg, check_ffprobe, Endpoint, FfmpegCommand, FfmpegProcess};
pub use probe::{parse_frame_rate, probe_video, VideoInfo, DEFAULT_FPS};
pub use stream::{decode_frames, encode_frames, split_raw_frames, EncodeSettings};
