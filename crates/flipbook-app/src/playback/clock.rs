use std::time::{Duration, Instant};

/// Frames behind schedule after which the clock resyncs instead of catching up.
const MAX_CATCH_UP: u32 = 4;

/// Deadline-based frame pacing for continuous playback.
///
/// Deadlines advance by a fixed interval from the previous deadline rather than from the time
/// the host got around to ticking, so pacing does not drift under load.
#[derive(Debug, Clone)]
pub struct FrameClock {
    interval: Duration,
    deadline: Option<Instant>,
}

impl FrameClock {
    pub fn new(fps: u32) -> Self {
        Self {
            interval: interval_for(fps),
            deadline: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_fps(&mut self, fps: u32) {
        self.interval = interval_for(fps);
    }

    /// Schedule the first frame one interval after `now`.
    pub fn start(&mut self, now: Instant) {
        self.deadline = Some(now + self.interval);
    }

    /// Drop the pending deadline. No frame is due until the next [`start`](Self::start).
    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Frames due at `now`, advancing the deadline past them.
    pub fn due(&mut self, now: Instant) -> u32 {
        let Some(deadline) = self.deadline else {
            return 0;
        };
        if now < deadline {
            return 0;
        }

        let behind = now.duration_since(deadline).as_nanos() / self.interval.as_nanos().max(1);
        let frames = u32::try_from(behind).unwrap_or(u32::MAX).saturating_add(1);
        if frames > MAX_CATCH_UP {
            log::trace!("Playback clock {frames} frames behind, resyncing");
            self.deadline = Some(now + self.interval);
            return 1;
        }
        self.deadline = Some(deadline + self.interval * frames);
        frames
    }
}

fn interval_for(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(fps.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_from_fps() {
        assert_eq!(FrameClock::new(50).interval(), Duration::from_millis(20));
        assert_eq!(FrameClock::new(0).interval(), Duration::from_secs(1));
    }

    #[test]
    fn nothing_due_before_deadline() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new(50);
        clock.start(t0);
        assert_eq!(clock.due(t0), 0);
        assert_eq!(clock.due(t0 + Duration::from_millis(19)), 0);
        assert_eq!(clock.due(t0 + Duration::from_millis(20)), 1);
        assert_eq!(clock.deadline(), Some(t0 + Duration::from_millis(40)));
    }

    #[test]
    fn deadlines_do_not_drift_with_late_ticks() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new(50);
        clock.start(t0);
        // Each tick lands 5ms late; the schedule stays on the 20ms grid
        assert_eq!(clock.due(t0 + Duration::from_millis(25)), 1);
        assert_eq!(clock.due(t0 + Duration::from_millis(45)), 1);
        assert_eq!(clock.deadline(), Some(t0 + Duration::from_millis(60)));
    }

    #[test]
    fn catches_up_small_lag() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new(50);
        clock.start(t0);
        assert_eq!(clock.due(t0 + Duration::from_millis(61)), 3);
        assert_eq!(clock.deadline(), Some(t0 + Duration::from_millis(80)));
    }

    #[test]
    fn resyncs_when_far_behind() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new(50);
        clock.start(t0);
        let late = t0 + Duration::from_secs(2);
        assert_eq!(clock.due(late), 1);
        assert_eq!(clock.deadline(), Some(late + Duration::from_millis(20)));
    }

    #[test]
    fn stop_clears_deadline() {
        let t0 = Instant::now();
        let mut clock = FrameClock::new(60);
        clock.start(t0);
        clock.stop();
        assert!(!clock.is_running());
        assert_eq!(clock.due(t0 + Duration::from_secs(1)), 0);
    }
}
