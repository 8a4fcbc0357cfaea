use std::time::{Duration, Instant};

/// Load counters shared between the fetch coordinator and the reporter.
#[derive(Debug, Clone)]
pub struct LoadProgress {
    /// Settled frames, loaded or failed. Never decreases.
    pub loaded_count: usize,
    pub total_count: usize,
    pub started_at: Instant,
}

impl LoadProgress {
    pub fn new(total_count: usize) -> Self {
        Self::starting_at(total_count, Instant::now())
    }

    pub fn starting_at(total_count: usize, started_at: Instant) -> Self {
        Self {
            loaded_count: 0,
            total_count,
            started_at,
        }
    }

    pub(crate) fn record_settled(&mut self) {
        self.loaded_count = (self.loaded_count + 1).min(self.total_count);
    }

    /// Settled share of the total, in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        self.loaded_count as f64 / self.total_count as f64
    }

    pub fn percent(&self) -> u8 {
        percent_of(self.fraction())
    }

    /// Estimated time left, `elapsed / loaded * remaining`. `None` until something has loaded.
    pub fn eta(&self, now: Instant) -> Option<Duration> {
        if self.loaded_count == 0 {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.started_at).as_secs_f64();
        let remaining = self.total_count.saturating_sub(self.loaded_count) as f64;
        Some(Duration::from_secs_f64(elapsed / self.loaded_count as f64 * remaining))
    }
}

/// What the host renders on the loading screen.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub percent: u8,
    pub loaded_count: usize,
    pub total_count: usize,
    pub eta_text: Option<String>,
    pub status_text: String,
    /// Set on exactly one report once loading has sat at 0% past the watchdog window.
    pub stuck: bool,
}

fn percent_of(fraction: f64) -> u8 {
    (fraction * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Format an ETA as `"Ns remaining"` or `"Mm Ss remaining"`.
pub fn format_eta(eta: Duration) -> String {
    let secs = eta.as_secs_f64().round() as u64;
    if secs < 60 {
        format!("{secs}s remaining")
    } else {
        format!("{}m {}s remaining", secs / 60, secs % 60)
    }
}

/// Turns raw load counters into loading-screen text, with a one-shot stuck watchdog.
pub struct ProgressReporter {
    stuck_window: Duration,
    stuck_fired: bool,
}

impl ProgressReporter {
    pub fn new(stuck_window: Duration) -> Self {
        Self {
            stuck_window,
            stuck_fired: false,
        }
    }

    pub fn report(&mut self, progress: &LoadProgress, now: Instant) -> ProgressReport {
        self.report_fraction(progress, progress.fraction(), now)
    }

    /// Like [`report`](Self::report), with the percentage taken from `fraction` (for example the
    /// average of per-worker progress) instead of the settled count.
    pub fn report_fraction(
        &mut self,
        progress: &LoadProgress,
        fraction: f64,
        now: Instant,
    ) -> ProgressReport {
        let percent = if fraction.is_finite() {
            percent_of(fraction)
        } else {
            progress.percent()
        };
        let eta_text = progress.eta(now).map(format_eta);

        let mut stuck = false;
        if progress.percent() == 0
            && !self.stuck_fired
            && now.saturating_duration_since(progress.started_at) > self.stuck_window
        {
            self.stuck_fired = true;
            stuck = true;
            log::warn!(
                "Loading appears stuck: 0% after {}s",
                self.stuck_window.as_secs()
            );
        }

        ProgressReport {
            percent,
            loaded_count: progress.loaded_count,
            total_count: progress.total_count,
            eta_text,
            status_text: format!(
                "{percent}% Complete ({}/{} frames)",
                progress.loaded_count, progress.total_count
            ),
            stuck,
        }
    }

    pub fn stuck_fired(&self) -> bool {
        self.stuck_fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(loaded: usize, total: usize, started: Instant) -> LoadProgress {
        let mut p = LoadProgress::starting_at(total, started);
        p.loaded_count = loaded;
        p
    }

    #[test]
    fn percent_rounds() {
        let t0 = Instant::now();
        assert_eq!(progress(0, 2033, t0).percent(), 0);
        assert_eq!(progress(10, 2033, t0).percent(), 0); // 0.49%
        assert_eq!(progress(11, 2033, t0).percent(), 1); // 0.54%
        assert_eq!(progress(1017, 2033, t0).percent(), 50);
        assert_eq!(progress(2033, 2033, t0).percent(), 100);
    }

    #[test]
    fn eta_undefined_before_first_frame() {
        let t0 = Instant::now();
        let p = progress(0, 100, t0);
        assert_eq!(p.eta(t0 + Duration::from_secs(30)), None);

        let mut reporter = ProgressReporter::new(Duration::from_secs(10));
        let report = reporter.report(&p, t0 + Duration::from_secs(3));
        assert_eq!(report.eta_text, None);
    }

    #[test]
    fn eta_from_throughput() {
        let t0 = Instant::now();
        // 25 frames in 10s → 75 left at 2.5 fps → 30s
        let p = progress(25, 100, t0);
        let eta = p.eta(t0 + Duration::from_secs(10)).unwrap();
        assert!((eta.as_secs_f64() - 30.0).abs() < 1e-6);
    }

    #[test]
    fn eta_text_formats() {
        assert_eq!(format_eta(Duration::from_secs(42)), "42s remaining");
        assert_eq!(format_eta(Duration::from_secs(59)), "59s remaining");
        assert_eq!(format_eta(Duration::from_secs(60)), "1m 0s remaining");
        assert_eq!(format_eta(Duration::from_secs(135)), "2m 15s remaining");
    }

    #[test]
    fn status_text_matches_loading_screen() {
        let t0 = Instant::now();
        let mut reporter = ProgressReporter::new(Duration::from_secs(10));
        let report = reporter.report(&progress(1017, 2033, t0), t0);
        assert_eq!(report.status_text, "50% Complete (1017/2033 frames)");
        assert_eq!(report.percent, 50);
    }

    #[test]
    fn stuck_warning_fires_once() {
        let t0 = Instant::now();
        let p = progress(0, 2033, t0);
        let mut reporter = ProgressReporter::new(Duration::from_secs(10));

        assert!(!reporter.report(&p, t0 + Duration::from_secs(5)).stuck);
        assert!(reporter.report(&p, t0 + Duration::from_secs(11)).stuck);
        assert!(!reporter.report(&p, t0 + Duration::from_secs(12)).stuck);
        assert!(!reporter.report(&p, t0 + Duration::from_secs(60)).stuck);
        assert!(reporter.stuck_fired());
    }

    #[test]
    fn no_stuck_warning_once_progressing() {
        let t0 = Instant::now();
        let mut reporter = ProgressReporter::new(Duration::from_secs(10));
        let report = reporter.report(&progress(500, 2033, t0), t0 + Duration::from_secs(30));
        assert!(!report.stuck);
    }

    #[test]
    fn percent_follows_given_fraction() {
        let t0 = Instant::now();
        let mut reporter = ProgressReporter::new(Duration::from_secs(10));
        let report = reporter.report_fraction(&progress(600, 2033, t0), 0.25, t0);
        assert_eq!(report.percent, 25);
        assert_eq!(report.status_text, "25% Complete (600/2033 frames)");

        let report = reporter.report_fraction(&progress(600, 2033, t0), f64::NAN, t0);
        assert_eq!(report.percent, 30);
    }

    #[test]
    fn loaded_count_never_exceeds_total() {
        let mut p = LoadProgress::new(2);
        p.record_settled();
        p.record_settled();
        p.record_settled();
        assert_eq!(p.loaded_count, 2);
    }
}
