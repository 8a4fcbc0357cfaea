use std::path::PathBuf;

use crate::media::video::{self, VideoMeta};
use crate::settings::{SourceMode, ViewerSettings};

/// How a single frame is located before it is fetched.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameLocator {
    /// Path or URL of a pre-rendered frame file.
    Uri(String),
    /// Seek position in the source video, in seconds.
    Timestamp(f64),
}

/// Identifies one frame before it is materialized.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDescriptor {
    pub index: usize,
    pub locator: FrameLocator,
}

/// Rate at which frames are pulled out of a video.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExtractionRate {
    /// `floor(duration * fps)` frames, one every `1 / fps` seconds.
    PerSecond(f64),
    /// A fixed number of frames spread evenly over the duration.
    Total(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("frame source not ready: {0}")]
    SourceNotReady(String),
    #[error("frame source yields no frames")]
    Empty,
}

/// Produces the ordered frame descriptors for a session.
#[derive(Debug, Clone)]
pub enum FrameSource {
    Manifest {
        base: String,
        extension: String,
        total: usize,
    },
    Video {
        path: PathBuf,
        meta: VideoMeta,
        rate: ExtractionRate,
    },
}

/// Path of frame `index` under `base`, e.g. `frames/frame_0042.webp`.
pub fn frame_path(base: &str, index: usize, extension: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        format!("frame_{index:04}.{extension}")
    } else {
        format!("{base}/frame_{index:04}.{extension}")
    }
}

impl FrameSource {
    pub fn manifest(base: impl Into<String>, extension: impl Into<String>, total: usize) -> Self {
        FrameSource::Manifest {
            base: base.into(),
            extension: extension.into(),
            total,
        }
    }

    /// Build the source described by the settings. Video mode probes the file.
    pub fn from_settings(settings: &ViewerSettings) -> Result<Self, SourceError> {
        match settings.source_mode {
            SourceMode::Manifest => Ok(Self::manifest(
                settings.frames_base.clone(),
                settings.frame_extension.clone(),
                settings.frame_count,
            )),
            SourceMode::Video => {
                let path = settings
                    .video_path
                    .clone()
                    .ok_or_else(|| SourceError::SourceNotReady("no video path configured".into()))?;
                let meta = video::probe_video(&path).map_err(SourceError::SourceNotReady)?;
                let rate = match settings.extraction_total {
                    Some(total) => ExtractionRate::Total(total),
                    None => ExtractionRate::PerSecond(settings.extraction_fps),
                };
                log::info!(
                    "Video source {}: {}x{}, {:?}s, {:?}",
                    path.display(),
                    meta.width,
                    meta.height,
                    meta.duration_secs,
                    rate
                );
                Ok(FrameSource::Video { path, meta, rate })
            }
        }
    }

    /// Generate the ordered descriptor list. Its length is the total frame count.
    pub fn generate(&self) -> Result<Vec<FrameDescriptor>, SourceError> {
        let descriptors = match self {
            FrameSource::Manifest {
                base,
                extension,
                total,
            } => (0..*total)
                .map(|index| FrameDescriptor {
                    index,
                    locator: FrameLocator::Uri(frame_path(base, index, extension)),
                })
                .collect::<Vec<_>>(),
            FrameSource::Video { meta, rate, .. } => {
                let duration = meta.duration_secs.ok_or_else(|| {
                    SourceError::SourceNotReady("video duration is unknown".into())
                })?;
                video_timestamps(duration, *rate)?
                    .into_iter()
                    .enumerate()
                    .map(|(index, t)| FrameDescriptor {
                        index,
                        locator: FrameLocator::Timestamp(t),
                    })
                    .collect()
            }
        };

        if descriptors.is_empty() {
            return Err(SourceError::Empty);
        }
        log::info!("Prepared {} frame descriptors", descriptors.len());
        Ok(descriptors)
    }
}

/// Seek timestamps for a video of `duration` seconds, clamped into `[0, duration)`.
pub fn video_timestamps(duration: f64, rate: ExtractionRate) -> Result<Vec<f64>, SourceError> {
    if !duration.is_finite() || duration <= 0.0 {
        return Err(SourceError::SourceNotReady(format!(
            "video duration {duration} is not usable"
        )));
    }

    let (total, step) = match rate {
        ExtractionRate::PerSecond(fps) => {
            if !fps.is_finite() || fps <= 0.0 {
                return Err(SourceError::SourceNotReady(format!(
                    "extraction rate {fps} fps is not usable"
                )));
            }
            ((duration * fps).floor() as usize, 1.0 / fps)
        }
        ExtractionRate::Total(total) => (total, duration / total.max(1) as f64),
    };

    // Largest representable time strictly before the end of the video
    let last = f64::from_bits(duration.to_bits() - 1);

    (0..total)
        .map(|i| {
            let t = i as f64 * step;
            if t.is_finite() {
                Ok(t.clamp(0.0, last))
            } else {
                Err(SourceError::SourceNotReady(format!("timestamp for frame {i} is not finite")))
            }
        })
        .collect()
}
