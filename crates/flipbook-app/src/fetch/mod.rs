pub mod batch;
pub mod loader;
pub mod seek;
pub mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::buffer::FrameTable;
use crate::media::FrameHandle;
use crate::progress::LoadProgress;
use crate::settings::{FetchMode, ViewerSettings};
use crate::source::FrameDescriptor;

use self::loader::FrameLoader;
use self::seek::FrameGrabber;

/// Why a single frame could not be materialized. Always recovered locally.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchFailure {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("seek timed out after {0:?}")]
    SeekTimeout(Duration),
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("descriptor kind not supported by this fetch strategy")]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("frame loading was cancelled")]
    Cancelled,
}

/// Shared cancellation flag for a running fetch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Message from a producer thread to the fetch coordinator.
#[derive(Debug)]
pub(crate) enum FetchMessage {
    Settled {
        index: usize,
        outcome: Result<FrameHandle, FetchFailure>,
    },
    /// Fraction of a worker's sub-range that has settled.
    WorkerProgress { worker: usize, fraction: f64 },
    ProducerDone { producer: usize },
}

/// Batch geometry for the parallel-batch strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    pub batch_size: usize,
    /// Batches in flight at once.
    pub concurrent_batches: usize,
    /// Threads fetching items of one batch.
    pub lanes_per_batch: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            concurrent_batches: 4,
            lanes_per_batch: 4,
        }
    }
}

impl BatchConfig {
    pub(crate) fn sanitized(self) -> Self {
        Self {
            batch_size: self.batch_size.max(1),
            concurrent_batches: self.concurrent_batches.max(1),
            lanes_per_batch: self.lanes_per_batch.max(1),
        }
    }
}

/// Concurrency strategy used to materialize descriptors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Strategy {
    Batches(BatchConfig),
    Workers { workers: usize, batch: BatchConfig },
    Seek { timeout: Duration },
}

/// What actually turns a descriptor into pixels.
pub enum FrameBackend {
    Loader(Arc<dyn FrameLoader>),
    Grabber(Box<dyn FrameGrabber>),
}

/// Starts fetches with a configured strategy.
#[derive(Debug, Clone, Copy)]
pub struct Fetcher {
    pub strategy: Strategy,
}

impl Fetcher {
    pub fn new(strategy: Strategy) -> Self {
        Self { strategy }
    }

    /// Manifest sources use batches or workers, video sources use sequential seeking.
    pub fn from_settings(settings: &ViewerSettings, video: bool) -> Self {
        let batch = BatchConfig {
            batch_size: settings.batch_size,
            concurrent_batches: settings.concurrent_batches,
            lanes_per_batch: settings.lanes_per_batch,
        };
        let strategy = if video {
            Strategy::Seek {
                timeout: settings.seek_timeout(),
            }
        } else {
            match settings.fetch_mode {
                FetchMode::Batches => Strategy::Batches(batch),
                FetchMode::Workers => {
                    let workers = settings.workers.max(1);
                    // Split the batch budget across workers
                    let per_worker = BatchConfig {
                        concurrent_batches: (settings.concurrent_batches / workers).max(1),
                        ..batch
                    };
                    Strategy::Workers {
                        workers,
                        batch: per_worker,
                    }
                }
            }
        };
        Self { strategy }
    }

    pub fn start(&self, descriptors: Vec<FrameDescriptor>, backend: FrameBackend) -> FetchHandle {
        log::info!(
            "Fetching {} frames with {:?}",
            descriptors.len(),
            self.strategy
        );
        match (self.strategy, backend) {
            (Strategy::Batches(config), FrameBackend::Loader(loader)) => {
                batch::spawn(descriptors, loader, config)
            }
            (Strategy::Workers { workers, batch }, FrameBackend::Loader(loader)) => {
                worker::spawn(descriptors, loader, workers, batch)
            }
            (Strategy::Seek { timeout }, FrameBackend::Grabber(grabber)) => {
                seek::spawn(descriptors, grabber, timeout)
            }
            (Strategy::Seek { .. }, FrameBackend::Loader(loader)) => {
                log::warn!("Seek strategy given a file loader, falling back to batches");
                batch::spawn(descriptors, loader, BatchConfig::default())
            }
            (_, FrameBackend::Grabber(grabber)) => {
                log::warn!("Batch strategies need a file loader, capturing sequentially instead");
                seek::spawn(descriptors, grabber, Duration::from_secs(5))
            }
        }
    }
}

/// Result of polling a [`FetchHandle`].
#[derive(Debug)]
pub enum FetchPoll {
    /// Still loading. `progressed` is true when frames settled since the last poll.
    Loading { progressed: bool },
    /// Every descriptor has settled. Returned exactly once.
    Complete(FrameTable),
    Cancelled,
    /// Completion was already handed out.
    Finished,
}

/// Coordinator side of a running fetch: owns the record table and merges producer results.
pub struct FetchHandle {
    rx: Receiver<FetchMessage>,
    cancel: CancelToken,
    table: Option<FrameTable>,
    progress: LoadProgress,
    producers: usize,
    producers_done: usize,
    worker_fractions: Vec<f64>,
    threads: Vec<JoinHandle<()>>,
}

impl FetchHandle {
    pub(crate) fn new(
        rx: Receiver<FetchMessage>,
        cancel: CancelToken,
        total: usize,
        producers: usize,
        worker_fractions: usize,
        threads: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            rx,
            cancel,
            table: Some(FrameTable::new(total)),
            progress: LoadProgress::new(total),
            producers,
            producers_done: 0,
            worker_fractions: vec![0.0; worker_fractions],
            threads,
        }
    }

    pub fn progress(&self) -> &LoadProgress {
        &self.progress
    }

    /// Average of per-worker fractions, or settled/total for single-producer strategies.
    pub fn fraction(&self) -> f64 {
        if self.worker_fractions.is_empty() {
            self.progress.fraction()
        } else {
            self.worker_fractions.iter().sum::<f64>() / self.worker_fractions.len() as f64
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Abandon outstanding work. No further records are written.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            log::info!("Frame loading cancelled at {} frames", self.progress.loaded_count);
        }
        self.cancel.cancel();
    }

    /// Drain pending producer messages without blocking.
    pub fn poll(&mut self) -> FetchPoll {
        let mut progressed = false;
        loop {
            if let Some(done) = self.check_finished() {
                return done;
            }
            match self.rx.try_recv() {
                Ok(msg) => progressed |= self.apply(msg),
                Err(TryRecvError::Empty) => return FetchPoll::Loading { progressed },
                Err(TryRecvError::Disconnected) => return self.complete(),
            }
        }
    }

    /// Like [`poll`](Self::poll), but waits up to `timeout` for the first message.
    pub fn poll_timeout(&mut self, timeout: Duration) -> FetchPoll {
        if let Some(done) = self.check_finished() {
            return done;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => {
                let progressed = self.apply(msg);
                match self.poll() {
                    FetchPoll::Loading { progressed: more } => FetchPoll::Loading {
                        progressed: progressed || more,
                    },
                    other => other,
                }
            }
            Err(RecvTimeoutError::Timeout) => FetchPoll::Loading { progressed: false },
            Err(RecvTimeoutError::Disconnected) => self.poll(),
        }
    }

    /// Block until every descriptor has settled, calling `on_progress` whenever frames settle.
    pub fn wait(
        mut self,
        mut on_progress: impl FnMut(&LoadProgress),
    ) -> Result<FrameTable, FetchError> {
        loop {
            let settled_before = self.progress.loaded_count;
            let done = match self.check_finished() {
                Some(done) => Some(done),
                None => match self.rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(msg) => {
                        self.apply(msg);
                        None
                    }
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => Some(self.complete()),
                },
            };
            if self.progress.loaded_count > settled_before {
                on_progress(&self.progress);
            }
            if let Some(done) = done {
                return match done {
                    FetchPoll::Complete(table) => Ok(table),
                    _ => Err(FetchError::Cancelled),
                };
            }
        }
    }

    fn check_finished(&mut self) -> Option<FetchPoll> {
        if self.cancel.is_cancelled() {
            self.table = None;
            return Some(FetchPoll::Cancelled);
        }
        if self.table.is_none() {
            return Some(FetchPoll::Finished);
        }
        if self.producers_done >= self.producers {
            return Some(self.complete());
        }
        None
    }

    /// Apply one producer message. Returns true when a frame settled.
    fn apply(&mut self, msg: FetchMessage) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let Some(table) = self.table.as_mut() else {
            return false;
        };
        match msg {
            FetchMessage::Settled { index, outcome } => {
                let payload = match outcome {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        log::warn!("Failed to load frame {index}: {e}");
                        None
                    }
                };
                if table.settle(index, payload) {
                    self.progress.record_settled();
                    true
                } else {
                    false
                }
            }
            FetchMessage::WorkerProgress { worker, fraction } => {
                if let Some(slot) = self.worker_fractions.get_mut(worker) {
                    *slot = slot.max(fraction.clamp(0.0, 1.0));
                }
                false
            }
            FetchMessage::ProducerDone { producer } => {
                self.producers_done += 1;
                log::debug!(
                    "Producer {producer} done ({}/{})",
                    self.producers_done,
                    self.producers
                );
                false
            }
        }
    }

    fn complete(&mut self) -> FetchPoll {
        if self.cancel.is_cancelled() {
            self.table = None;
            return FetchPoll::Cancelled;
        }
        // Messages sent just before the last ProducerDone may still be queued
        while let Ok(msg) = self.rx.try_recv() {
            self.apply(msg);
        }
        let Some(mut table) = self.table.take() else {
            return FetchPoll::Finished;
        };
        let missing = table.fail_pending();
        if missing > 0 {
            log::warn!("{missing} frame(s) never reported back; marking failed");
            for _ in 0..missing {
                self.progress.record_settled();
            }
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        log::info!(
            "All frames settled: {} loaded, {} failed in {:.1}s",
            table.loaded_count(),
            table.failed_count(),
            Instant::now()
                .saturating_duration_since(self.progress.started_at)
                .as_secs_f64()
        );
        FetchPoll::Complete(table)
    }
}

impl Drop for FetchHandle {
    fn drop(&mut self) {
        // Producer threads notice the flag and stop; they are not joined here
        if self.table.is_some() {
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::FetchFailure;
    use super::loader::FrameLoader;
    use crate::media::DecodedFrame;

    /// Loader that encodes the frame number into the pixel data and fails on request.
    pub struct FakeLoader {
        pub fail: HashSet<usize>,
        pub delay: Duration,
        pub seen: Mutex<Vec<usize>>,
    }

    impl FakeLoader {
        pub fn new() -> Self {
            Self {
                fail: HashSet::new(),
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(fail: impl IntoIterator<Item = usize>) -> Self {
            Self {
                fail: fail.into_iter().collect(),
                ..Self::new()
            }
        }
    }

    /// Parse the frame number out of `.../frame_0042.webp`.
    pub fn index_of(uri: &str) -> usize {
        let name = uri.rsplit('/').next().unwrap();
        let digits: String = name.chars().filter(char::is_ascii_digit).collect();
        digits.parse().unwrap()
    }

    impl FrameLoader for FakeLoader {
        fn load(&self, uri: &str) -> Result<DecodedFrame, FetchFailure> {
            let index = index_of(uri);
            self.seen.lock().unwrap().push(index);
            if !self.delay.is_zero() {
                // Vary completion order between neighbouring frames
                std::thread::sleep(self.delay * ((index % 3) as u32));
            }
            if self.fail.contains(&index) {
                return Err(FetchFailure::Status(404));
            }
            Ok(DecodedFrame {
                data: (index as u32).to_le_bytes().to_vec(),
                width: 1,
                height: 1,
            })
        }
    }

    pub fn tag(data: &[u8]) -> usize {
        u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize
    }
}
