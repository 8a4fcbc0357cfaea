use std::sync::Arc;

use super::{FrameStatus, FrameTable};
use crate::media::{DecodedFrame, FrameHandle};

/// Finalization rules.
#[derive(Debug, Clone, Copy)]
pub struct FinalizePolicy {
    /// Loaded ratio below which a [`PartialLoadWarning`] is raised (0.95, or 0.98 when strict).
    pub min_loaded_ratio: f64,
    /// Intended frame count. Records past it are dropped.
    pub max_frames: Option<usize>,
}

impl Default for FinalizePolicy {
    fn default() -> Self {
        Self {
            min_loaded_ratio: 0.95,
            max_frames: None,
        }
    }
}

/// Raised when fewer frames loaded than the policy expects. Playback still starts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("only {loaded} of {total} frames loaded ({percent}%)")]
pub struct PartialLoadWarning {
    pub loaded: usize,
    pub total: usize,
    pub percent: u8,
}

/// Not a single frame loaded; there is nothing to play.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no frames loaded out of {total}")]
pub struct NoFramesLoaded {
    pub total: usize,
}

/// The frozen, gapless frame sequence used for playback.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    frames: Arc<[FrameHandle]>,
}

impl FrameBuffer {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DecodedFrame> {
        self.frames.get(index).map(|f| &**f)
    }

    /// True when both slots share the same pixels (one was backfilled from the other).
    pub fn shares_payload(&self, a: usize, b: usize) -> bool {
        match (self.frames.get(a), self.frames.get(b)) {
            (Some(x), Some(y)) => Arc::ptr_eq(x, y),
            _ => false,
        }
    }
}

/// Output of [`finalize`].
#[derive(Debug)]
pub struct Finalized {
    pub buffer: FrameBuffer,
    pub warning: Option<PartialLoadWarning>,
    /// Slots filled from a neighbouring frame.
    pub backfilled: usize,
    /// Trailing records dropped by the frame-count clamp.
    pub clamped: usize,
}

/// Turn fetch outcomes into a playable buffer.
///
/// Failed or still-pending slots are filled with the nearest earlier loaded frame; a leading
/// run of failures takes the first loaded frame after it.
pub fn finalize(table: FrameTable, policy: FinalizePolicy) -> Result<Finalized, NoFramesLoaded> {
    let mut records = table.into_records();

    let mut clamped = 0;
    if let Some(max) = policy.max_frames {
        if records.len() > max {
            clamped = records.len() - max;
            log::info!(
                "Clamping frame count from {} to intended {max}",
                records.len()
            );
            records.truncate(max);
        }
    }

    let total = records.len();
    let valid = records
        .iter()
        .filter(|r| r.status == FrameStatus::Loaded && r.payload.is_some())
        .count();
    log::info!("Final verification: {valid} of {total} frames are valid");

    let Some(first_valid) = records
        .iter()
        .find_map(|r| r.payload.clone().filter(|_| r.status == FrameStatus::Loaded))
    else {
        log::error!("No frames loaded out of {total}");
        return Err(NoFramesLoaded { total });
    };

    let warning = if (valid as f64) < total as f64 * policy.min_loaded_ratio {
        let w = PartialLoadWarning {
            loaded: valid,
            total,
            percent: (valid as f64 / total as f64 * 100.0).round() as u8,
        };
        log::warn!("{w}");
        Some(w)
    } else {
        None
    };

    let mut backfilled = 0;
    let mut last_valid = first_valid;
    let frames: Vec<FrameHandle> = records
        .into_iter()
        .map(|record| match record.payload {
            Some(handle) if record.status == FrameStatus::Loaded => {
                last_valid = handle.clone();
                handle
            }
            _ => {
                backfilled += 1;
                log::debug!("Backfilling frame {}", record.index);
                last_valid.clone()
            }
        })
        .collect();

    if backfilled > 0 {
        log::warn!("Backfilled {backfilled} missing frame(s)");
    }

    Ok(Finalized {
        buffer: FrameBuffer {
            frames: frames.into(),
        },
        warning,
        backfilled,
        clamped,
    })
}
