//! Offline pre-rendering of a video into a frame manifest.
//!
//! Frames are captured at fixed timestamps with a [`FrameGrabber`], optionally downscaled, and
//! written as `frame_NNNN.<ext>` files next to a `manifest.json` that lists them. The output
//! directory can then be played as a manifest source.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::fetch::seek::{FrameGrabber, capture_at};
use crate::media::DecodedFrame;
use crate::media::video::VideoMeta;
use crate::progress::{LoadProgress, format_eta};
use crate::source::{ExtractionRate, SourceError, frame_path, video_timestamps};

pub const MANIFEST_FILE: &str = "manifest.json";

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub fps: f64,
    /// Output size relative to the source; 1.0 keeps it.
    pub scale: f64,
    /// Frames past this count are not extracted.
    pub limit: Option<usize>,
    /// `webp`, `png` or `jpg`.
    pub extension: String,
    /// JPEG quality. WebP and PNG output is lossless.
    pub quality: u8,
    pub seek_timeout: Duration,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            fps: 30.0,
            scale: 1.0,
            limit: Some(2033),
            extension: "webp".to_string(),
            quality: 90,
            seek_timeout: Duration::from_secs(5),
        }
    }
}

/// Index of a pre-rendered frame directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameManifest {
    /// Frame slots, including any that failed to extract.
    pub frame_count: usize,
    pub extension: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// File names that were written, in frame order.
    pub frames: Vec<String>,
}

impl FrameManifest {
    pub fn write_to(&self, path: &Path) -> Result<(), ExtractError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("scale {0} is not usable")]
    Scale(f64),
    #[error("cannot write '{0}' frames (use webp, png or jpg)")]
    Format(String),
    #[error("failed to encode {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize manifest: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("no frames could be extracted")]
    NothingExtracted,
}

#[derive(Debug)]
pub struct ExtractSummary {
    pub extracted: usize,
    pub failed: usize,
    /// Total size of the written frame files.
    pub bytes: u64,
    pub manifest: FrameManifest,
}

/// Capture every timestamp of the video into `out_dir` and write its manifest.
///
/// A frame that fails to capture is logged and skipped; its slot keeps its index so the
/// remaining files line up with the timestamps.
pub fn extract_frames(
    grabber: &mut dyn FrameGrabber,
    meta: &VideoMeta,
    out_dir: &Path,
    options: &ExtractOptions,
) -> Result<ExtractSummary, ExtractError> {
    let format = output_format(&options.extension)?;
    if !options.scale.is_finite() || options.scale <= 0.0 {
        return Err(ExtractError::Scale(options.scale));
    }
    let duration = meta
        .duration_secs
        .ok_or_else(|| SourceError::SourceNotReady("video duration is unknown".into()))?;

    let mut timestamps = video_timestamps(duration, ExtractionRate::PerSecond(options.fps))?;
    if let Some(limit) = options.limit {
        if timestamps.len() > limit {
            log::info!("Limiting extraction from {} to {limit} frames", timestamps.len());
            timestamps.truncate(limit);
        }
    }
    if timestamps.is_empty() {
        return Err(SourceError::Empty.into());
    }

    let width = scaled(meta.width, options.scale);
    let height = scaled(meta.height, options.scale);
    std::fs::create_dir_all(out_dir).map_err(|source| ExtractError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;
    log::info!(
        "Extracting {} frames at {} fps into {} ({width}x{height})",
        timestamps.len(),
        options.fps,
        out_dir.display()
    );

    let mut progress = LoadProgress::new(timestamps.len());
    let mut last_log = progress.started_at;
    let mut frames = Vec::with_capacity(timestamps.len());
    let mut failed = 0;
    let mut bytes = 0;

    for (index, &timestamp) in timestamps.iter().enumerate() {
        let captured = capture_at(grabber, timestamp, options.seek_timeout);
        match captured.map(|frame| to_image(frame, width, height)) {
            Ok(Some(image)) => {
                let name = frame_path("", index, &options.extension);
                let path = out_dir.join(&name);
                bytes += write_image(image, &path, format, options.quality)?;
                frames.push(name);
            }
            Ok(None) => {
                log::warn!("Frame {index} at {timestamp:.3}s has a malformed pixel buffer");
                failed += 1;
            }
            Err(e) => {
                log::warn!("Failed to extract frame {index} at {timestamp:.3}s: {e}");
                failed += 1;
            }
        }

        progress.record_settled();
        let now = Instant::now();
        if now.saturating_duration_since(last_log) >= PROGRESS_LOG_INTERVAL {
            let eta = progress.eta(now).map(format_eta).unwrap_or_default();
            log::info!(
                "Extracted {}/{} frames ({}%) {eta}",
                progress.loaded_count,
                progress.total_count,
                progress.percent()
            );
            last_log = now;
        }
    }

    if frames.is_empty() {
        return Err(ExtractError::NothingExtracted);
    }

    let manifest = FrameManifest {
        frame_count: timestamps.len(),
        extension: options.extension.clone(),
        width,
        height,
        fps: options.fps,
        frames,
    };
    manifest.write_to(&out_dir.join(MANIFEST_FILE))?;

    let extracted = manifest.frames.len();
    log::info!(
        "Extraction complete: {extracted} frames, {failed} failed, {:.2} MB in {:.1}s",
        bytes as f64 / (1024.0 * 1024.0),
        progress.started_at.elapsed().as_secs_f64()
    );
    Ok(ExtractSummary {
        extracted,
        failed,
        bytes,
        manifest,
    })
}

fn output_format(extension: &str) -> Result<ImageFormat, ExtractError> {
    match ImageFormat::from_extension(extension) {
        Some(format @ (ImageFormat::WebP | ImageFormat::Png | ImageFormat::Jpeg)) => Ok(format),
        _ => Err(ExtractError::Format(extension.to_string())),
    }
}

fn scaled(dimension: u32, scale: f64) -> u32 {
    ((f64::from(dimension) * scale).floor() as u32).max(1)
}

fn to_image(frame: DecodedFrame, width: u32, height: u32) -> Option<RgbaImage> {
    let image = RgbaImage::from_raw(frame.width, frame.height, frame.data)?;
    if image.dimensions() == (width, height) {
        Some(image)
    } else {
        Some(imageops::resize(&image, width, height, FilterType::Triangle))
    }
}

/// Encode `image` to `path`, returning the file size.
fn write_image(
    image: RgbaImage,
    path: &Path,
    format: ImageFormat,
    quality: u8,
) -> Result<u64, ExtractError> {
    let io_error = |source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    };
    let encode_error = |source| ExtractError::Encode {
        path: path.to_path_buf(),
        source,
    };

    if format == ImageFormat::Jpeg {
        // JPEG has no alpha channel
        let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
        let mut writer = BufWriter::new(File::create(path).map_err(io_error)?);
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, quality))
            .map_err(encode_error)?;
        writer.flush().map_err(io_error)?;
    } else {
        image.save_with_format(path, format).map_err(encode_error)?;
    }

    std::fs::metadata(path).map(|m| m.len()).map_err(io_error)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crossbeam_channel::{Receiver, bounded};

    use super::*;
    use crate::fetch::FetchFailure;
    use crate::media::decoder::decode_image;
    use crate::session::{LoadEvent, Session, UserGesture};
    use crate::settings::ViewerSettings;

    /// Returns solid frames whose red channel is the frame number.
    struct SolidGrabber {
        fps: f64,
        width: u32,
        height: u32,
        broken: HashSet<usize>,
    }

    impl FrameGrabber for SolidGrabber {
        fn request(&mut self, timestamp: f64) -> Receiver<Result<DecodedFrame, FetchFailure>> {
            let index = (timestamp * self.fps).round() as usize;
            let (tx, rx) = bounded(1);
            let outcome = if self.broken.contains(&index) {
                Err(FetchFailure::Capture("decoder error".into()))
            } else {
                let pixels = (self.width * self.height) as usize;
                Ok(DecodedFrame {
                    data: [index as u8, 0, 0, 255].repeat(pixels),
                    width: self.width,
                    height: self.height,
                })
            };
            let _ = tx.send(outcome);
            rx
        }

        fn abandon(&mut self) {}
    }

    fn meta(duration: Option<f64>) -> VideoMeta {
        VideoMeta {
            width: 4,
            height: 2,
            fps: 30.0,
            duration_secs: duration,
        }
    }

    fn grabber(broken: impl IntoIterator<Item = usize>) -> SolidGrabber {
        SolidGrabber {
            fps: 10.0,
            width: 4,
            height: 2,
            broken: broken.into_iter().collect(),
        }
    }

    fn options(extension: &str) -> ExtractOptions {
        ExtractOptions {
            fps: 10.0,
            scale: 0.5,
            limit: Some(8),
            extension: extension.to_string(),
            ..ExtractOptions::default()
        }
    }

    #[test]
    fn writes_scaled_frames_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("frames");
        let summary =
            extract_frames(&mut grabber([3]), &meta(Some(1.0)), &out, &options("png")).unwrap();

        assert_eq!((summary.extracted, summary.failed), (7, 1));
        assert!(summary.bytes > 0);
        assert!(!out.join("frame_0003.png").exists());
        assert!(!out.join("frame_0008.png").exists());

        let bytes = std::fs::read(out.join("frame_0005.png")).unwrap();
        let frame = decode_image(&bytes, None).unwrap();
        assert_eq!((frame.width, frame.height), (2, 1));
        assert_eq!(frame.data[0], 5);

        let json = std::fs::read_to_string(out.join(MANIFEST_FILE)).unwrap();
        let manifest: FrameManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(manifest, summary.manifest);
        assert_eq!(manifest.frame_count, 8);
        assert_eq!((manifest.width, manifest.height), (2, 1));
        assert_eq!(manifest.frames[0], "frame_0000.png");
        assert_eq!(manifest.frames.len(), 7);
    }

    #[test]
    fn extracted_directory_plays_as_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let summary =
            extract_frames(&mut grabber([3]), &meta(Some(1.0)), dir.path(), &options("png"))
                .unwrap();

        let mut settings = ViewerSettings::default();
        settings.frames_base = dir.path().to_string_lossy().into_owned();
        settings.frame_extension = summary.manifest.extension.clone();
        settings.frame_count = summary.manifest.frame_count;
        let mut events = Vec::new();
        let mut controller = Session::new(settings)
            .begin(UserGesture::from_input(), |e| events.push(e.clone()))
            .unwrap();

        assert_eq!(controller.total(), 8);
        assert!(events.iter().any(|e| matches!(e, LoadEvent::PartialLoad(_))));
        controller.seek(3);
        assert_eq!(controller.current_frame().unwrap().data[0], 2);
    }

    #[test]
    fn jpeg_output_drops_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options("jpg");
        opts.limit = Some(2);
        let summary =
            extract_frames(&mut grabber([]), &meta(Some(1.0)), dir.path(), &opts).unwrap();
        assert_eq!(summary.manifest.frames, vec!["frame_0000.jpg", "frame_0001.jpg"]);

        let bytes = std::fs::read(dir.path().join("frame_0001.jpg")).unwrap();
        let frame = decode_image(&bytes, Some(ImageFormat::Jpeg)).unwrap();
        assert_eq!((frame.width, frame.height), (2, 1));
        assert_eq!(frame.data[3], 255);
    }

    #[test]
    fn bad_options_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let m = meta(Some(1.0));
        assert!(matches!(
            extract_frames(&mut grabber([]), &m, dir.path(), &options("gif")),
            Err(ExtractError::Format(_))
        ));
        let mut opts = options("png");
        opts.scale = 0.0;
        assert!(matches!(
            extract_frames(&mut grabber([]), &m, dir.path(), &opts),
            Err(ExtractError::Scale(_))
        ));
        assert!(matches!(
            extract_frames(&mut grabber([]), &meta(None), dir.path(), &options("png")),
            Err(ExtractError::Source(SourceError::SourceNotReady(_)))
        ));
    }

    #[test]
    fn all_captures_failing_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let m = meta(Some(1.0));
        let result = extract_frames(&mut grabber(0..8), &m, dir.path(), &options("png"));
        assert!(matches!(result, Err(ExtractError::NothingExtracted)));
        assert!(!dir.path().join(MANIFEST_FILE).exists());
    }

    #[test]
    fn default_limit_matches_frame_count() {
        let opts = ExtractOptions::default();
        assert_eq!(opts.limit, Some(ViewerSettings::default().frame_count));
        assert_eq!(opts.extension, "webp");
    }
}
