//! One viewing session: source → fetch → finalize → playback.
//!
//! Everything a session needs is owned here and handed to the controller at the end; there is
//! no global frame state. Loading only starts from [`Session::begin`], which requires a
//! [`UserGesture`] so the host can start media from inside its input handler.

use std::time::{Duration, Instant};

use crate::buffer::{FinalizePolicy, NoFramesLoaded, PartialLoadWarning, finalize};
use crate::fetch::loader::loader_for;
use crate::fetch::{CancelToken, FetchError, FetchPoll, Fetcher, FrameBackend};
use crate::media::video::{self, FfmpegGrabber};
use crate::playback::PlaybackController;
use crate::progress::{ProgressReport, ProgressReporter};
use crate::settings::ViewerSettings;
use crate::source::{FrameSource, SourceError};

/// How often the session wakes to check cancellation and the stuck watchdog.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Proof that loading was requested by an explicit user action.
#[derive(Debug)]
pub struct UserGesture {
    _private: (),
}

impl UserGesture {
    /// Construct from inside the host's click or key handler.
    pub fn from_input() -> Self {
        Self { _private: () }
    }
}

/// Notifications for the host's loading screen.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadEvent {
    /// Loading has started inside the user gesture; the host may start audio now.
    Started,
    Progress(ProgressReport),
    /// Still at 0% after the watchdog window. Advisory; loading continues.
    Stuck,
    PartialLoad(PartialLoadWarning),
    Ready { total: usize },
    Failed(String),
}

/// Fatal outcomes of a session load.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    NoFrames(#[from] NoFramesLoaded),
}

pub struct Session {
    settings: ViewerSettings,
    source: Option<FrameSource>,
    backend: Option<FrameBackend>,
    cancel: CancelToken,
}

impl Session {
    pub fn new(settings: ViewerSettings) -> Self {
        Self {
            settings,
            source: None,
            backend: None,
            cancel: CancelToken::new(),
        }
    }

    /// Use `source` instead of the one described by the settings.
    pub fn with_source(mut self, source: FrameSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Use `backend` instead of the HTTP/file loader or ffmpeg grabber.
    pub fn with_backend(mut self, backend: FrameBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn settings(&self) -> &ViewerSettings {
        &self.settings
    }

    /// Token that aborts [`begin`](Self::begin) from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Load every frame and return a controller positioned at frame 0.
    pub fn begin(
        self,
        _gesture: UserGesture,
        mut on_event: impl FnMut(&LoadEvent),
    ) -> Result<PlaybackController, LoadError> {
        on_event(&LoadEvent::Started);
        let result = self.load(&mut on_event);
        if let Err(ref e) = result {
            log::error!("Session load failed: {e}");
            on_event(&LoadEvent::Failed(e.to_string()));
        }
        result
    }

    fn load(self, on_event: &mut impl FnMut(&LoadEvent)) -> Result<PlaybackController, LoadError> {
        let Session {
            settings,
            source,
            backend,
            cancel,
        } = self;

        let source = match source {
            Some(source) => source,
            None => FrameSource::from_settings(&settings)?,
        };
        let mut descriptors = source.generate()?;
        if let Some(max) = settings.max_frames {
            if descriptors.len() > max {
                log::info!("Limiting {} frames to {max}", descriptors.len());
                descriptors.truncate(max);
            }
        }
        let total = descriptors.len();
        let is_video = matches!(source, FrameSource::Video { .. });
        let backend = match backend {
            Some(backend) => backend,
            None => default_backend(&source, &settings)?,
        };

        let mut handle = Fetcher::from_settings(&settings, is_video).start(descriptors, backend);
        let mut reporter = ProgressReporter::new(settings.stuck_window());

        let table = loop {
            if cancel.is_cancelled() {
                handle.cancel();
            }
            match handle.poll_timeout(POLL_INTERVAL) {
                FetchPoll::Loading { progressed } => {
                    let report = reporter.report_fraction(
                        handle.progress(),
                        handle.fraction(),
                        Instant::now(),
                    );
                    if report.stuck {
                        on_event(&LoadEvent::Stuck);
                    }
                    if progressed {
                        on_event(&LoadEvent::Progress(report));
                    }
                }
                FetchPoll::Complete(table) => break table,
                FetchPoll::Cancelled | FetchPoll::Finished => {
                    return Err(FetchError::Cancelled.into());
                }
            }
        };
        on_event(&LoadEvent::Progress(reporter.report_fraction(
            handle.progress(),
            handle.fraction(),
            Instant::now(),
        )));

        let policy = FinalizePolicy {
            min_loaded_ratio: settings.verification_ratio(),
            max_frames: Some(total),
        };
        let done = finalize(table, policy)?;
        if let Some(warning) = done.warning {
            on_event(&LoadEvent::PartialLoad(warning));
        }

        let total = done.buffer.len();
        log::info!(
            "Session ready: {total} frames ({} backfilled, {} clamped)",
            done.backfilled,
            done.clamped
        );
        let controller = PlaybackController::with_buffer(
            done.buffer,
            settings.playback_fps,
            settings.hold_threshold(),
        );
        on_event(&LoadEvent::Ready { total });
        Ok(controller)
    }
}

fn default_backend(
    source: &FrameSource,
    settings: &ViewerSettings,
) -> Result<FrameBackend, SourceError> {
    match source {
        FrameSource::Manifest { base, .. } => Ok(FrameBackend::Loader(loader_for(
            base,
            settings.request_timeout(),
        ))),
        FrameSource::Video { path, meta, .. } => {
            if !video::ffmpeg_available() {
                return Err(SourceError::SourceNotReady(
                    "ffmpeg not found on PATH".into(),
                ));
            }
            Ok(FrameBackend::Grabber(Box::new(FfmpegGrabber::new(
                path.clone(),
                meta,
            ))))
        }
    }
}
