//! Sequential-seek capture for video sources.
//!
//! One timestamp is in flight at a time. The next seek is issued only after the current capture
//! resolves or the per-frame timeout elapses; a timed-out capture is abandoned and recorded as a
//! failed frame so the pipeline never stalls on a single seek.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use super::{CancelToken, FetchFailure, FetchHandle, FetchMessage};
use crate::media::DecodedFrame;
use crate::source::{FrameDescriptor, FrameLocator};

/// Captures a single still from a seekable source.
pub trait FrameGrabber: Send {
    /// Seek to `timestamp` and capture. The outcome arrives on the returned channel.
    fn request(&mut self, timestamp: f64) -> Receiver<Result<DecodedFrame, FetchFailure>>;
    /// Give up on the in-flight capture after a timeout.
    fn abandon(&mut self);
}

/// Start a sequential-seek fetch on a background thread.
pub fn spawn(
    descriptors: Vec<FrameDescriptor>,
    grabber: Box<dyn FrameGrabber>,
    timeout: Duration,
) -> FetchHandle {
    let total = descriptors.len();
    let (tx, rx) = unbounded();
    let cancel = CancelToken::new();
    let thread_cancel = cancel.clone();

    let handle = thread::Builder::new()
        .name("flipbook-seek".into())
        .spawn(move || {
            run(&descriptors, grabber, timeout, &thread_cancel, &tx);
        });

    match handle {
        Ok(handle) => FetchHandle::new(rx, cancel, total, 1, 0, vec![handle]),
        Err(e) => {
            log::error!("Failed to spawn seek thread: {e}");
            FetchHandle::new(rx, cancel, total, 0, 0, Vec::new())
        }
    }
}

fn run(
    descriptors: &[FrameDescriptor],
    mut grabber: Box<dyn FrameGrabber>,
    timeout: Duration,
    cancel: &CancelToken,
    tx: &Sender<FetchMessage>,
) {
    for descriptor in descriptors {
        if cancel.is_cancelled() {
            grabber.abandon();
            return;
        }
        let outcome = capture(grabber.as_mut(), descriptor, timeout);
        if let Err(ref e) = outcome {
            log::debug!("Frame {} capture failed: {e}", descriptor.index);
        }
        let _ = tx.send(FetchMessage::Settled {
            index: descriptor.index,
            outcome: outcome.map(std::sync::Arc::new),
        });
    }
    log::info!("Completed extracting {} frames", descriptors.len());
    let _ = tx.send(FetchMessage::ProducerDone { producer: 0 });
}

fn capture(
    grabber: &mut dyn FrameGrabber,
    descriptor: &FrameDescriptor,
    timeout: Duration,
) -> Result<DecodedFrame, FetchFailure> {
    let FrameLocator::Timestamp(t) = descriptor.locator else {
        return Err(FetchFailure::Unsupported);
    };
    capture_at(grabber, t, timeout)
}

/// Capture the frame at `timestamp`, abandoning the seek if it outlives `timeout`.
pub(crate) fn capture_at(
    grabber: &mut dyn FrameGrabber,
    timestamp: f64,
    timeout: Duration,
) -> Result<DecodedFrame, FetchFailure> {
    let pending = grabber.request(timestamp);
    match pending.recv_timeout(timeout) {
        Ok(outcome) => outcome,
        Err(RecvTimeoutError::Timeout) => {
            grabber.abandon();
            Err(FetchFailure::SeekTimeout(timeout))
        }
        Err(RecvTimeoutError::Disconnected) => {
            Err(FetchFailure::Capture("grabber dropped the capture".into()))
        }
    }
}
