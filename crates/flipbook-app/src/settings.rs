use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Pre-rendered `frame_NNNN.ext` files under `frames_base`.
    Manifest,
    /// Frames captured from `video_path` one seek at a time.
    Video,
}

/// How manifest frames are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    Batches,
    Workers,
}

/// Persisted viewer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerSettings {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_source_mode")]
    pub source_mode: SourceMode,
    /// Directory or `http(s)://` URL holding the frame files.
    #[serde(default = "default_frames_base")]
    pub frames_base: String,
    #[serde(default = "default_frame_extension")]
    pub frame_extension: String,
    #[serde(default = "default_frame_count")]
    pub frame_count: usize,
    /// Upper limit on frames per session. Longer sources are cut before fetching.
    #[serde(default)]
    pub max_frames: Option<usize>,
    #[serde(default)]
    pub video_path: Option<PathBuf>,
    /// Extraction rate for video mode. Ignored when `extraction_total` is set.
    #[serde(default = "default_extraction_fps")]
    pub extraction_fps: f64,
    /// Fixed number of frames spread evenly over the video.
    #[serde(default)]
    pub extraction_total: Option<usize>,
    #[serde(default = "default_fetch_mode")]
    pub fetch_mode: FetchMode,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrent_batches")]
    pub concurrent_batches: usize,
    #[serde(default = "default_lanes_per_batch")]
    pub lanes_per_batch: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub seek_timeout_ms: u64,
    /// Use the 98% verification threshold instead of 95%.
    #[serde(default)]
    pub strict_verification: bool,
    #[serde(default = "default_stuck_warning_secs")]
    pub stuck_warning_secs: u64,
    #[serde(default = "default_playback_fps")]
    pub playback_fps: u32,
    #[serde(default = "default_hold_threshold_ms")]
    pub hold_threshold_ms: u64,
}

fn default_version() -> u32 {
    1
}

fn default_source_mode() -> SourceMode {
    SourceMode::Manifest
}

fn default_frames_base() -> String {
    "frames".to_string()
}

fn default_frame_extension() -> String {
    "webp".to_string()
}

fn default_frame_count() -> usize {
    2033
}

fn default_extraction_fps() -> f64 {
    30.0
}

fn default_fetch_mode() -> FetchMode {
    FetchMode::Batches
}

fn default_batch_size() -> usize {
    50
}

fn default_concurrent_batches() -> usize {
    4
}

fn default_lanes_per_batch() -> usize {
    4
}

fn default_workers() -> usize {
    4
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_stuck_warning_secs() -> u64 {
    10
}

fn default_playback_fps() -> u32 {
    60
}

fn default_hold_threshold_ms() -> u64 {
    200
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            version: default_version(),
            source_mode: default_source_mode(),
            frames_base: default_frames_base(),
            frame_extension: default_frame_extension(),
            frame_count: default_frame_count(),
            max_frames: None,
            video_path: None,
            extraction_fps: default_extraction_fps(),
            extraction_total: None,
            fetch_mode: default_fetch_mode(),
            batch_size: default_batch_size(),
            concurrent_batches: default_concurrent_batches(),
            lanes_per_batch: default_lanes_per_batch(),
            workers: default_workers(),
            request_timeout_ms: default_timeout_ms(),
            seek_timeout_ms: default_timeout_ms(),
            strict_verification: false,
            stuck_warning_secs: default_stuck_warning_secs(),
            playback_fps: default_playback_fps(),
            hold_threshold_ms: default_hold_threshold_ms(),
        }
    }
}

impl ViewerSettings {
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("flipbook").join("settings.json")
    }

    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => {
                    log::info!("Loaded settings from {}", path.display());
                    settings
                }
                Err(e) => {
                    log::warn!("Failed to parse settings: {e}");
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("No settings found at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self) {
        self.save_to(&Self::config_path());
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("Failed to create config dir: {e}");
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    log::error!("Failed to write settings: {e}");
                } else {
                    log::debug!("Saved settings to {}", path.display());
                }
            }
            Err(e) => log::error!("Failed to serialize settings: {e}"),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn seek_timeout(&self) -> Duration {
        Duration::from_millis(self.seek_timeout_ms)
    }

    pub fn stuck_window(&self) -> Duration {
        Duration::from_secs(self.stuck_warning_secs)
    }

    pub fn hold_threshold(&self) -> Duration {
        Duration::from_millis(self.hold_threshold_ms)
    }

    /// Fraction of frames that must load before a partial-load warning is raised.
    pub fn verification_ratio(&self) -> f64 {
        if self.strict_verification { 0.98 } else { 0.95 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_defaults() {
        let s = ViewerSettings::default();
        assert_eq!(s.source_mode, SourceMode::Manifest);
        assert_eq!(s.frame_count, 2033);
        assert_eq!(s.max_frames, None);
        assert_eq!(s.batch_size, 50);
        assert_eq!(s.concurrent_batches, 4);
        assert_eq!(s.playback_fps, 60);
        assert_eq!(s.hold_threshold(), Duration::from_millis(200));
        assert_eq!(s.seek_timeout(), Duration::from_secs(5));
        assert_eq!(s.stuck_window(), Duration::from_secs(10));
    }

    #[test]
    fn partial_json_defaults() {
        let json = r#"{"frame_count": 120, "source_mode": "video", "fetch_mode": "workers"}"#;
        let s: ViewerSettings = serde_json::from_str(json).unwrap();
        assert_eq!(s.frame_count, 120);
        assert_eq!(s.source_mode, SourceMode::Video);
        assert_eq!(s.fetch_mode, FetchMode::Workers);
        assert_eq!(s.frame_extension, "webp"); // default
        assert_eq!(s.workers, 4); // default
        assert!(!s.strict_verification); // default false
    }

    #[test]
    fn verification_ratio_modes() {
        let mut s = ViewerSettings::default();
        assert!((s.verification_ratio() - 0.95).abs() < 1e-12);
        s.strict_verification = true;
        assert!((s.verification_ratio() - 0.98).abs() < 1e-12);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut s = ViewerSettings::default();
        s.frames_base = "https://cdn.example.com/frames".into();
        s.playback_fps = 30;
        s.save_to(&path);

        let loaded = ViewerSettings::load_from(&path);
        assert_eq!(loaded.frames_base, "https://cdn.example.com/frames");
        assert_eq!(loaded.playback_fps, 30);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let loaded = ViewerSettings::load_from(&path);
        assert_eq!(loaded.frame_count, 2033);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = ViewerSettings::load_from(&dir.path().join("absent.json"));
        assert_eq!(loaded.batch_size, 50);
    }
}
