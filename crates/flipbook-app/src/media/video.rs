//! Video frame extraction via ffmpeg subprocesses.
//!
//! - `ffprobe` probes metadata (dimensions, fps, duration) before descriptors are generated
//! - each frame is captured with its own `ffmpeg -ss <t> -frames:v 1 -f rawvideo -pix_fmt rgba`
//!   run, so exactly one seek is in flight at a time
//! - a capture that outlives the seek timeout is killed by [`FfmpegGrabber::abandon`]

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::OnceLock;
use std::thread;

use crossbeam_channel::{Receiver, bounded};

use super::decoder;
use super::types::DecodedFrame;
use crate::fetch::FetchFailure;
use crate::fetch::seek::FrameGrabber;

/// Check if ffmpeg/ffprobe are available on the system. Cached per process.
pub fn ffmpeg_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        Command::new("ffprobe")
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    })
}

/// Video metadata from ffprobe.
#[derive(Debug, Clone)]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// `None` when neither the container nor the stream reports a duration.
    pub duration_secs: Option<f64>,
}

/// Probe video metadata using ffprobe.
pub fn probe_video(path: &Path) -> Result<VideoMeta, String> {
    if !ffmpeg_available() {
        return Err("ffprobe is not installed".to_string());
    }

    let output = Command::new("ffprobe")
        .args([
            "-v", "quiet",
            "-print_format", "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .map_err(|e| format!("ffprobe failed to execute: {e}"))?;

    if !output.status.success() {
        return Err("ffprobe returned non-zero exit code".to_string());
    }

    parse_probe_json(&output.stdout)
}

fn parse_probe_json(stdout: &[u8]) -> Result<VideoMeta, String> {
    let json: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|e| format!("Failed to parse ffprobe JSON: {e}"))?;

    let streams = json["streams"]
        .as_array()
        .ok_or("No streams in ffprobe output")?;

    let video_stream = streams
        .iter()
        .find(|s| s["codec_type"].as_str() == Some("video"))
        .ok_or("No video stream found")?;

    let width = video_stream["width"]
        .as_u64()
        .ok_or("Missing width")? as u32;
    let height = video_stream["height"]
        .as_u64()
        .ok_or("Missing height")? as u32;

    let fps = parse_frame_rate(
        video_stream["r_frame_rate"]
            .as_str()
            .unwrap_or("30/1"),
    );

    let duration_secs = json["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .or_else(|| {
            video_stream["duration"]
                .as_str()
                .and_then(|s| s.parse::<f64>().ok())
        });

    Ok(VideoMeta {
        width,
        height,
        fps,
        duration_secs,
    })
}

fn parse_frame_rate(rate: &str) -> f64 {
    if let Some((num, den)) = rate.split_once('/') {
        let n: f64 = num.parse().unwrap_or(30.0);
        let d: f64 = den.parse().unwrap_or(1.0);
        if d > 0.0 { n / d } else { 30.0 }
    } else {
        rate.parse().unwrap_or(30.0)
    }
}

/// Captures single frames from a video file, one ffmpeg process per seek.
pub struct FfmpegGrabber {
    path: PathBuf,
    width: u32,
    height: u32,
    in_flight: Option<Child>,
}

impl FfmpegGrabber {
    pub fn new(path: PathBuf, meta: &VideoMeta) -> Self {
        Self {
            path,
            width: meta.width,
            height: meta.height,
            in_flight: None,
        }
    }

    fn reap(&mut self) {
        if let Some(mut child) = self.in_flight.take() {
            let _ = child.wait();
        }
    }
}

impl FrameGrabber for FfmpegGrabber {
    fn request(&mut self, timestamp: f64) -> Receiver<Result<DecodedFrame, FetchFailure>> {
        self.reap();
        let (tx, rx) = bounded(1);

        let spawned = Command::new("ffmpeg")
            .args(["-v", "quiet", "-ss", &format!("{timestamp:.3}"), "-i"])
            .arg(&self.path)
            .args([
                "-frames:v", "1",
                "-f", "rawvideo",
                "-pix_fmt", "rgba",
                "-s", &format!("{}x{}", self.width, self.height),
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let _ = tx.send(Err(FetchFailure::Capture(format!("Failed to spawn ffmpeg: {e}"))));
                return rx;
            }
        };

        let Some(mut stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = tx.send(Err(FetchFailure::Capture("ffmpeg: no stdout pipe".into())));
            return rx;
        };
        self.in_flight = Some(child);

        let (width, height) = (self.width, self.height);
        let frame_size = (width as usize) * (height as usize) * 4;
        let reader = thread::Builder::new()
            .name("flipbook-ffmpeg-read".into())
            .spawn(move || {
                let mut buf = vec![0u8; frame_size];
                let result = match stdout.read_exact(&mut buf) {
                    Ok(()) => decoder::from_rgba(buf, width, height).map_err(FetchFailure::Capture),
                    Err(e) => Err(FetchFailure::Capture(format!(
                        "ffmpeg produced no frame at {timestamp:.3}s: {e}"
                    ))),
                };
                // Receiver is gone if the capture was abandoned
                let _ = tx.send(result);
            });

        if let Err(e) = reader {
            log::error!("Failed to spawn ffmpeg reader thread: {e}");
            self.abandon();
        }
        rx
    }

    fn abandon(&mut self) {
        if let Some(mut child) = self.in_flight.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for FfmpegGrabber {
    fn drop(&mut self) {
        self.abandon();
    }
}
