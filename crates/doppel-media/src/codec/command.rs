//! FFmpeg command builder and process helpers.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

/// Input or output of an FFmpeg command.
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    File(PathBuf),
    /// `pipe:0` for input, `pipe:1` for output
    Pipe,
}

impl Endpoint {
    fn as_input(&self) -> String {
        match self {
            Endpoint::File(p) => p.to_string_lossy().to_string(),
            Endpoint::Pipe => "pipe:0".to_string(),
        }
    }

    fn as_output(&self) -> String {
        match self {
            Endpoint::File(p) => p.to_string_lossy().to_string(),
            Endpoint::Pipe => "pipe:1".to_string(),
        }
    }
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: Endpoint,
    output: Endpoint,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    pub fn new(input: Endpoint, output: Endpoint) -> Self {
        Self {
            input,
            output,
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Describe raw RGB24 frames arriving on the input.
    pub fn raw_rgb_input(self, width: u32, height: u32, fps: f64) -> Self {
        self.input_args([
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-s".to_string(),
            format!("{}x{}", width, height),
            "-r".to_string(),
            format!("{:.6}", fps),
        ])
    }

    /// Emit every decoded frame as raw RGB24, without dropping or duplicating.
    pub fn raw_rgb_output(self) -> Self {
        self.output_args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-fps_mode", "passthrough"])
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn pixel_format(self, format: impl Into<String>) -> Self {
        self.output_arg("-pix_fmt").output_arg(format)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Stop after exactly `count` frames.
    pub fn frame_limit(self, count: usize) -> Self {
        self.output_arg("-frames:v").output_arg(count.to_string())
    }

    /// Drop audio streams.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.overwrite {
            args.push("-y".to_string());
        }
        args.push("-v".to_string());
        args.push(self.log_level.clone());
        args.push("-nostdin".to_string());
        args.extend(self.input_args.clone());
        args.push("-i".to_string());
        args.push(self.input.as_input());
        args.extend(self.output_args.clone());
        args.push(self.output.as_output());
        args
    }

    /// Start FFmpeg with piped stdio where the endpoints ask for it.
    pub fn spawn(&self) -> MediaResult<FfmpegProcess> {
        check_ffmpeg()?;
        let args = self.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let stdin = if self.input == Endpoint::Pipe {
            Stdio::piped()
        } else {
            Stdio::null()
        };
        let stdout = if self.output == Endpoint::Pipe {
            Stdio::piped()
        } else {
            Stdio::null()
        };
        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))?;
        Ok(FfmpegProcess {
            child,
            stderr: drain(stderr),
        })
    }
}

/// A running FFmpeg process whose stderr is collected in the background.
pub struct FfmpegProcess {
    pub child: Child,
    stderr: JoinHandle<String>,
}

impl FfmpegProcess {
    /// Wait for exit, optionally bounded by `timeout_secs`.
    ///
    /// A non-zero exit carries the collected stderr.
    pub async fn finish(mut self, timeout_secs: Option<u64>) -> MediaResult<()> {
        let status = match timeout_secs {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), self.child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!("FFmpeg timed out after {} seconds, killing process", secs);
                    let _ = self.child.kill().await;
                    return Err(MediaError::Timeout(secs));
                }
            },
            None => self.child.wait().await?,
        };
        let stderr = self.stderr.await.unwrap_or_default();
        if status.success() {
            if !stderr.trim().is_empty() {
                debug!(stderr = %stderr.trim(), "FFmpeg reported diagnostics");
            }
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                Some(stderr),
                status.code(),
            ))
        }
    }
}

fn drain(mut stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).to_string()
    })
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}
