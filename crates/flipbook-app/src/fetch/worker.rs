//! Worker-partitioned fetching.
//!
//! The index range is split into contiguous, disjoint sub-ranges, one per worker. Each worker runs
//! the parallel-batch strategy over its own sub-range and reports a completion fraction; the
//! fetch completes only after every worker has reported done.

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crossbeam_channel::{Sender, unbounded};

use super::batch::fetch_range;
use super::loader::FrameLoader;
use super::{BatchConfig, CancelToken, FetchFailure, FetchHandle, FetchMessage};
use crate::media::FrameHandle;
use crate::source::FrameDescriptor;

/// Frames between two progress reports from one worker.
const PROGRESS_EVERY: usize = 10;

/// Split `0..total` into `workers` contiguous ranges whose lengths differ by at most one.
pub fn partition(total: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.max(1);
    let base = total / workers;
    let extra = total % workers;
    let mut start = 0;
    (0..workers)
        .map(|w| {
            let len = base + usize::from(w < extra);
            let range = start..start + len;
            start += len;
            range
        })
        .collect()
}

/// Start `workers` worker threads, each fetching its own sub-range.
pub fn spawn(
    descriptors: Vec<FrameDescriptor>,
    loader: Arc<dyn FrameLoader>,
    workers: usize,
    batch: BatchConfig,
) -> FetchHandle {
    let total = descriptors.len();
    let ranges = partition(total, workers);
    let workers = ranges.len();
    let descriptors: Arc<[FrameDescriptor]> = descriptors.into();
    let (tx, rx) = unbounded();
    let cancel = CancelToken::new();

    let mut threads = Vec::with_capacity(workers);
    let mut started = 0;
    for (worker, range) in ranges.into_iter().enumerate() {
        let descriptors = descriptors.clone();
        let loader = loader.clone();
        let thread_cancel = cancel.clone();
        let tx = tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("flipbook-worker-{worker}"))
            .spawn(move || {
                run(worker, &descriptors, range, loader.as_ref(), batch, &thread_cancel, &tx);
            });
        match spawned {
            Ok(handle) => {
                threads.push(handle);
                started += 1;
            }
            Err(e) => log::error!("Failed to spawn worker {worker}: {e}"),
        }
    }
    log::info!("Started {started} of {workers} frame workers");

    FetchHandle::new(rx, cancel, total, started, workers, threads)
}

fn run(
    worker: usize,
    descriptors: &[FrameDescriptor],
    range: Range<usize>,
    loader: &dyn FrameLoader,
    batch: BatchConfig,
    cancel: &CancelToken,
    tx: &Sender<FetchMessage>,
) {
    let len = range.len();
    log::debug!("Worker {worker} fetching frames {range:?}");
    let settled = AtomicUsize::new(0);
    let sink = |index: usize, outcome: Result<FrameHandle, FetchFailure>| {
        let _ = tx.send(FetchMessage::Settled { index, outcome });
        let n = settled.fetch_add(1, Ordering::Relaxed) + 1;
        if n % PROGRESS_EVERY == 0 {
            let _ = tx.send(FetchMessage::WorkerProgress {
                worker,
                fraction: n as f64 / len as f64,
            });
        }
    };
    fetch_range(descriptors, range, loader, batch, cancel, &sink);

    if !cancel.is_cancelled() {
        let _ = tx.send(FetchMessage::WorkerProgress {
            worker,
            fraction: 1.0,
        });
    }
    let _ = tx.send(FetchMessage::ProducerDone { producer: worker });
}
