//! Parallel-batch fetching.
//!
//! Descriptors are cut into fixed-size batches. Up to `concurrent_batches` runners each take the
//! next unstarted batch, fetch its items on `lanes_per_batch` threads, and move on once every
//! item of the batch has settled. A failed item never stops its batch.

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crossbeam_channel::{Sender, unbounded};

use super::loader::FrameLoader;
use super::{BatchConfig, CancelToken, FetchFailure, FetchHandle, FetchMessage};
use crate::media::FrameHandle;
use crate::source::{FrameDescriptor, FrameLocator};

/// Split `range` into consecutive batches of at most `batch_size`.
pub fn batches(range: Range<usize>, batch_size: usize) -> Vec<Range<usize>> {
    let size = batch_size.max(1);
    let mut out = Vec::with_capacity(range.len().div_ceil(size));
    let mut start = range.start;
    while start < range.end {
        let end = (start + size).min(range.end);
        out.push(start..end);
        start = end;
    }
    out
}

/// Fetch one descriptor with `loader`.
pub(crate) fn fetch_one(
    loader: &dyn FrameLoader,
    descriptor: &FrameDescriptor,
) -> Result<FrameHandle, FetchFailure> {
    match &descriptor.locator {
        FrameLocator::Uri(uri) => loader.load(uri).map(Arc::new),
        FrameLocator::Timestamp(_) => Err(FetchFailure::Unsupported),
    }
}

/// Fetch the descriptors at positions `range` with the parallel-batch strategy, blocking until
/// every batch has settled or the fetch is cancelled. `sink` receives each outcome.
pub(crate) fn fetch_range(
    descriptors: &[FrameDescriptor],
    range: Range<usize>,
    loader: &dyn FrameLoader,
    config: BatchConfig,
    cancel: &CancelToken,
    sink: &(dyn Fn(usize, Result<FrameHandle, FetchFailure>) + Sync),
) {
    let config = config.sanitized();
    let plan = batches(range, config.batch_size);
    let batch_count = plan.len();
    let next_batch = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..config.concurrent_batches.min(batch_count) {
            scope.spawn(|| {
                loop {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let b = next_batch.fetch_add(1, Ordering::Relaxed);
                    let Some(batch) = plan.get(b) else {
                        return;
                    };
                    log::debug!(
                        "Loading batch {} of {} (frames {} to {})",
                        b + 1,
                        batch_count,
                        batch.start,
                        batch.end - 1
                    );
                    let loaded =
                        run_batch(descriptors, batch.clone(), loader, config, cancel, sink);
                    log::debug!(
                        "Batch {} completed: {loaded}/{} frames loaded",
                        b + 1,
                        batch.len()
                    );
                }
            });
        }
    });
}

/// Fetch every item of one batch. Returns how many loaded.
fn run_batch(
    descriptors: &[FrameDescriptor],
    batch: Range<usize>,
    loader: &dyn FrameLoader,
    config: BatchConfig,
    cancel: &CancelToken,
    sink: &(dyn Fn(usize, Result<FrameHandle, FetchFailure>) + Sync),
) -> usize {
    let next_item = AtomicUsize::new(batch.start);
    let loaded = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..config.lanes_per_batch.min(batch.len()) {
            scope.spawn(|| {
                loop {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let pos = next_item.fetch_add(1, Ordering::Relaxed);
                    if pos >= batch.end {
                        return;
                    }
                    let descriptor = &descriptors[pos];
                    let outcome = fetch_one(loader, descriptor);
                    if outcome.is_ok() {
                        loaded.fetch_add(1, Ordering::Relaxed);
                    }
                    if !cancel.is_cancelled() {
                        sink(descriptor.index, outcome);
                    }
                }
            });
        }
    });

    loaded.into_inner()
}

/// Start a parallel-batch fetch over all descriptors on a background thread.
pub fn spawn(
    descriptors: Vec<FrameDescriptor>,
    loader: Arc<dyn FrameLoader>,
    config: BatchConfig,
) -> FetchHandle {
    let total = descriptors.len();
    let (tx, rx) = unbounded();
    let cancel = CancelToken::new();
    let thread_cancel = cancel.clone();

    let handle = thread::Builder::new()
        .name("flipbook-batch".into())
        .spawn(move || {
            run(&descriptors, loader.as_ref(), config, &thread_cancel, &tx);
        });

    let threads = match handle {
        Ok(handle) => vec![handle],
        Err(e) => {
            // Nothing will ever report; completion marks every frame failed
            log::error!("Failed to spawn batch loader thread: {e}");
            return FetchHandle::new(rx, cancel, total, 0, 0, Vec::new());
        }
    };

    FetchHandle::new(rx, cancel, total, 1, 0, threads)
}

fn run(
    descriptors: &[FrameDescriptor],
    loader: &dyn FrameLoader,
    config: BatchConfig,
    cancel: &CancelToken,
    tx: &Sender<FetchMessage>,
) {
    let sink = |index: usize, outcome: Result<FrameHandle, FetchFailure>| {
        let _ = tx.send(FetchMessage::Settled { index, outcome });
    };
    fetch_range(descriptors, 0..descriptors.len(), loader, config, cancel, &sink);
    let _ = tx.send(FetchMessage::ProducerDone { producer: 0 });
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::buffer::{FinalizePolicy, FrameStatus, finalize};
    use crate::fetch::testing::{FakeLoader, tag};
    use crate::source::FrameSource;

    fn descriptors(n: usize) -> Vec<FrameDescriptor> {
        FrameSource::manifest("frames", "webp", n).generate().unwrap()
    }

    #[test]
    fn batches_cover_range_exactly_once() {
        let plan = batches(0..2033, 50);
        assert_eq!(plan.len(), 41);
        assert_eq!(plan[0], 0..50);
        assert_eq!(plan[40], 2000..2033);
        let mut seen = HashSet::new();
        for b in &plan {
            for i in b.clone() {
                assert!(seen.insert(i));
            }
        }
        assert_eq!(seen.len(), 2033);
    }

    #[test]
    fn batches_of_sub_range() {
        assert_eq!(batches(10..25, 10), vec![10..20, 20..25]);
        assert!(batches(5..5, 10).is_empty());
        assert_eq!(batches(0..3, 0), vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn all_frames_load_in_index_order() {
        let config = BatchConfig {
            batch_size: 50,
            concurrent_batches: 4,
            lanes_per_batch: 4,
        };
        let handle = spawn(descriptors(2033), Arc::new(FakeLoader::new()), config);

        let mut calls = 0;
        let mut last = 0;
        let table = handle
            .wait(|p| {
                calls += 1;
                assert!(p.loaded_count >= last);
                last = p.loaded_count;
            })
            .unwrap();

        assert_eq!(calls, 2033);
        assert_eq!(last, 2033);
        assert_eq!(table.len(), 2033);
        assert_eq!(table.loaded_count(), 2033);
        for (i, record) in table.records().iter().enumerate() {
            assert_eq!(tag(&record.payload.as_ref().unwrap().data), i);
        }
    }

    #[test]
    fn failures_do_not_abort_the_batch() {
        let loader = FakeLoader::failing([0, 3, 4, 99]);
        let config = BatchConfig {
            batch_size: 10,
            concurrent_batches: 2,
            lanes_per_batch: 3,
        };
        let table = spawn(descriptors(100), Arc::new(loader), config)
            .wait(|_| {})
            .unwrap();

        assert!(table.is_complete());
        assert_eq!(table.failed_count(), 4);
        assert_eq!(table.records()[3].status, FrameStatus::Failed);
        assert_eq!(table.records()[5].status, FrameStatus::Loaded);
    }

    #[test]
    fn completion_order_does_not_change_result() {
        let config = BatchConfig {
            batch_size: 7,
            concurrent_batches: 3,
            lanes_per_batch: 3,
        };
        let run = |delay: Duration| {
            let mut loader = FakeLoader::failing([0, 10, 11, 40]);
            loader.delay = delay;
            let table = spawn(descriptors(60), Arc::new(loader), config)
                .wait(|_| {})
                .unwrap();
            let done = finalize(table, FinalizePolicy::default()).unwrap();
            (0..60)
                .map(|i| tag(&done.buffer.get(i).unwrap().data))
                .collect::<Vec<_>>()
        };

        let fast = run(Duration::ZERO);
        let jittered = run(Duration::from_millis(1));
        assert_eq!(fast, jittered);
        assert_eq!(fast[0], 1); // leading failure takes first loaded frame
        assert_eq!(fast[11], 9);
        assert_eq!(fast[40], 39);
    }

    #[test]
    fn fetch_range_only_touches_its_range() {
        let all = descriptors(100);
        let loader = FakeLoader::new();
        let got = Mutex::new(Vec::new());
        let sink = |index: usize, outcome: Result<FrameHandle, FetchFailure>| {
            assert!(outcome.is_ok());
            got.lock().unwrap().push(index);
        };
        fetch_range(&all, 20..45, &loader, BatchConfig::default(), &CancelToken::new(), &sink);

        let mut got = got.into_inner().unwrap();
        got.sort_unstable();
        assert_eq!(got, (20..45).collect::<Vec<_>>());
    }

    #[test]
    fn timestamp_descriptors_are_unsupported() {
        let d = FrameDescriptor {
            index: 0,
            locator: FrameLocator::Timestamp(1.0),
        };
        assert_eq!(fetch_one(&FakeLoader::new(), &d).unwrap_err(), FetchFailure::Unsupported);
    }
}
