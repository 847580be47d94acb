//! Raw RGB frame streaming through FFmpeg pipes.

use std::path::Path;

use image::RgbImage;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::command::{Endpoint, FfmpegCommand};
use super::probe::{probe_video, VideoInfo};
use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;

/// Output encoding parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSettings {
    pub fps: f64,
    pub codec: String,
    pub crf: u8,
    pub preset: String,
    pub pixel_format: String,
    /// Upper bound on the encode in seconds
    pub timeout_secs: Option<u64>,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            fps: 30.0,
            codec: "libx264".to_string(),
            crf: 18,
            preset: "medium".to_string(),
            pixel_format: "yuv420p".to_string(),
            timeout_secs: None,
        }
    }
}

impl EncodeSettings {
    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = fps;
        self
    }
}

fn frame_bytes(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

fn frame_from_raw(index: usize, fps: f64, width: u32, height: u32, raw: Vec<u8>) -> MediaResult<Frame> {
    let image = RgbImage::from_raw(width, height, raw)
        .ok_or_else(|| MediaError::internal(format!("Raw buffer does not fit {}x{}", width, height)))?;
    Ok(Frame::new(index, index as f64 / fps, image))
}

/// Split a raw RGB24 byte stream into frames.
///
/// A trailing partial frame means the stream was truncated.
pub fn split_raw_frames(bytes: &[u8], width: u32, height: u32, fps: f64) -> MediaResult<Vec<Frame>> {
    let size = frame_bytes(width, height);
    if size == 0 {
        return Err(MediaError::InvalidVideo("Zero-sized frames".to_string()));
    }
    if bytes.len() % size != 0 {
        return Err(MediaError::InvalidVideo(format!(
            "Raw stream of {} bytes is not a whole number of {}x{} frames",
            bytes.len(),
            width,
            height
        )));
    }
    bytes
        .chunks_exact(size)
        .enumerate()
        .map(|(i, chunk)| frame_from_raw(i, fps, width, height, chunk.to_vec()))
        .collect()
}

/// Fill `buf` from the reader, returning how many bytes arrived before EOF.
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> MediaResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Decode every frame of a video into memory, in presentation order.
///
/// Frame `i` gets index `i` and timestamp `i / fps`.
pub async fn decode_frames(path: impl AsRef<Path>) -> MediaResult<(VideoInfo, Vec<Frame>)> {
    let path = path.as_ref();
    let info = probe_video(path).await?;
    let (width, height) = (info.width, info.height);
    let size = frame_bytes(width, height);

    let mut process = FfmpegCommand::new(Endpoint::File(path.to_path_buf()), Endpoint::Pipe)
        .no_audio()
        .raw_rgb_output()
        .spawn()?;
    let mut stdout = process
        .child
        .stdout
        .take()
        .ok_or_else(|| MediaError::internal("FFmpeg stdout not captured"))?;

    let mut frames = Vec::with_capacity(info.expected_frames());
    loop {
        let mut buf = vec![0u8; size];
        let filled = read_chunk(&mut stdout, &mut buf).await?;
        if filled == 0 {
            break;
        }
        if filled < size {
            warn!(
                frame = frames.len(),
                bytes = filled,
                "Discarding truncated trailing frame"
            );
            break;
        }
        frames.push(frame_from_raw(frames.len(), info.fps, width, height, buf)?);
    }
    drop(stdout);
    process.finish(None).await?;

    if frames.is_empty() {
        return Err(MediaError::InvalidVideo(format!(
            "No frames decoded from {}",
            path.display()
        )));
    }
    if let Some(declared) = info.frame_count {
        if declared != frames.len() {
            debug!(declared, decoded = frames.len(), "Container frame count differs from decoded");
        }
    }
    info!(
        path = %path.display(),
        frames = frames.len(),
        width,
        height,
        fps = info.fps,
        "Decoded video"
    );
    Ok((info, frames))
}

/// Encode frames to a video file, emitting exactly `frames.len()` frames.
pub async fn encode_frames(
    frames: &[Frame],
    path: impl AsRef<Path>,
    settings: &EncodeSettings,
) -> MediaResult<()> {
    let path = path.as_ref();
    let Some(first) = frames.first() else {
        return Err(MediaError::InvalidVideo("Nothing to encode".to_string()));
    };
    let (width, height) = first.dimensions();
    if let Some(odd) = frames.iter().find(|f| f.dimensions() != (width, height)) {
        return Err(MediaError::InvalidVideo(format!(
            "Frame {} is {}x{}, expected {}x{}",
            odd.index,
            odd.width(),
            odd.height(),
            width,
            height
        )));
    }
    if !(settings.fps.is_finite() && settings.fps > 0.0) {
        return Err(MediaError::InvalidVideo(format!("Invalid frame rate {}", settings.fps)));
    }

    let mut process = FfmpegCommand::new(Endpoint::Pipe, Endpoint::File(path.to_path_buf()))
        .raw_rgb_input(width, height, settings.fps)
        .video_codec(settings.codec.clone())
        .pixel_format(settings.pixel_format.clone())
        .crf(settings.crf)
        .preset(settings.preset.clone())
        .frame_limit(frames.len())
        .spawn()?;
    let mut stdin = process
        .child
        .stdin
        .take()
        .ok_or_else(|| MediaError::internal("FFmpeg stdin not captured"))?;

    for frame in frames {
        if let Err(e) = stdin.write_all(frame.image.as_raw()).await {
            // a broken pipe means FFmpeg died; its exit status explains why
            warn!(frame = frame.index, error = %e, "FFmpeg stopped accepting frames");
            break;
        }
    }
    stdin.shutdown().await.ok();
    drop(stdin);
    process.finish(settings.timeout_secs).await?;

    info!(
        path = %path.display(),
        frames = frames.len(),
        width,
        height,
        "Encoded video"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn frame(index: usize, w: u32, h: u32) -> Frame {
        Frame::new(index, index as f64 / 30.0, RgbImage::from_pixel(w, h, Rgb([1, 2, 3])))
    }

    #[test]
    fn test_split_raw_frames() {
        let mut bytes = vec![10u8; 4 * 2 * 3];
        bytes.extend(vec![20u8; 4 * 2 * 3]);
        let frames = split_raw_frames(&bytes, 4, 2, 25.0).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].index, 1);
        assert!((frames[1].timestamp - 0.04).abs() < 1e-12);
        assert_eq!(frames[1].image.get_pixel(3, 1), &Rgb([20, 20, 20]));
    }

    #[test]
    fn test_split_rejects_truncated_stream() {
        let bytes = vec![0u8; 4 * 2 * 3 + 5];
        assert!(matches!(
            split_raw_frames(&bytes, 4, 2, 25.0),
            Err(MediaError::InvalidVideo(_))
        ));
    }

    #[tokio::test]
    async fn test_read_chunk_reports_short_read() {
        let data = vec![7u8; 10];
        let mut reader = data.as_slice();
        let mut buf = vec![0u8; 8];
        assert_eq!(read_chunk(&mut reader, &mut buf).await.unwrap(), 8);
        assert_eq!(read_chunk(&mut reader, &mut buf).await.unwrap(), 2);
        assert_eq!(read_chunk(&mut reader, &mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_encode_rejects_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let result = encode_frames(&[], dir.path().join("out.mp4"), &EncodeSettings::default()).await;
        assert!(matches!(result, Err(MediaError::InvalidVideo(_))));
    }

    #[tokio::test]
    async fn test_encode_rejects_mixed_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let frames = vec![frame(0, 8, 8), frame(1, 8, 6)];
        let result = encode_frames(&frames, dir.path().join("out.mp4"), &EncodeSettings::default()).await;
        match result {
            Err(MediaError::InvalidVideo(msg)) => assert!(msg.contains("Frame 1")),
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_encode_rejects_bad_fps() {
        let dir = tempfile::tempdir().unwrap();
        let frames = vec![frame(0, 8, 8)];
        let settings = EncodeSettings::default().with_fps(0.0);
        let result = encode_frames(&frames, dir.path().join("out.mp4"), &settings).await;
        assert!(matches!(result, Err(MediaError::InvalidVideo(_))));
    }
}
