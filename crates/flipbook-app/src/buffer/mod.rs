pub mod finalize;

pub use finalize::{
    FinalizePolicy, Finalized, FrameBuffer, NoFramesLoaded, PartialLoadWarning, finalize,
};

use crate::media::FrameHandle;

/// Fetch outcome of one frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Pending,
    Loaded,
    Failed,
}

/// One slot of the load-time frame table.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub index: usize,
    pub status: FrameStatus,
    pub payload: Option<FrameHandle>,
}

/// Fixed-length, index-keyed record table filled while frames load.
///
/// Producers finish in any order; each outcome is written to the slot named by
/// its index, and a slot settles exactly once.
#[derive(Debug)]
pub struct FrameTable {
    records: Vec<FrameRecord>,
    loaded: usize,
    failed: usize,
}

impl FrameTable {
    pub fn new(total: usize) -> Self {
        Self {
            records: (0..total)
                .map(|index| FrameRecord {
                    index,
                    status: FrameStatus::Pending,
                    payload: None,
                })
                .collect(),
            loaded: 0,
            failed: 0,
        }
    }

    /// Settle slot `index`. Returns false when the slot does not exist or already settled.
    pub fn settle(&mut self, index: usize, payload: Option<FrameHandle>) -> bool {
        let Some(record) = self.records.get_mut(index) else {
            log::warn!(
                "Dropping outcome for frame {index}: outside table of {}",
                self.records.len()
            );
            return false;
        };
        if record.status != FrameStatus::Pending {
            log::warn!(
                "Frame {index} already settled as {:?}, ignoring second outcome",
                record.status
            );
            return false;
        }
        match payload {
            Some(handle) => {
                record.status = FrameStatus::Loaded;
                record.payload = Some(handle);
                self.loaded += 1;
            }
            None => {
                record.status = FrameStatus::Failed;
                self.failed += 1;
            }
        }
        true
    }

    /// Mark every slot still pending as failed. Returns how many were affected.
    pub fn fail_pending(&mut self) -> usize {
        let mut count = 0;
        for record in &mut self.records {
            if record.status == FrameStatus::Pending {
                record.status = FrameStatus::Failed;
                count += 1;
            }
        }
        self.failed += count;
        count
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded
    }

    pub fn failed_count(&self) -> usize {
        self.failed
    }

    pub fn settled_count(&self) -> usize {
        self.loaded + self.failed
    }

    pub fn is_complete(&self) -> bool {
        self.settled_count() == self.records.len()
    }

    pub fn records(&self) -> &[FrameRecord] {
        &self.records
    }

    pub(crate) fn into_records(self) -> Vec<FrameRecord> {
        self.records
    }
}

#[cfg(test)]
pub(crate) fn solid_frame(tag: u8) -> FrameHandle {
    std::sync::Arc::new(crate::media::DecodedFrame {
        data: vec![tag, tag, tag, 255],
        width: 1,
        height: 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_table_is_all_pending() {
        let table = FrameTable::new(5);
        assert_eq!(table.len(), 5);
        assert!(table.records().iter().all(|r| r.status == FrameStatus::Pending));
        assert!(table.records().iter().enumerate().all(|(i, r)| r.index == i));
        assert!(!table.is_complete());
    }

    #[test]
    fn settle_out_of_order_keeps_index_order() {
        let mut table = FrameTable::new(3);
        assert!(table.settle(2, Some(solid_frame(2))));
        assert!(table.settle(0, None));
        assert!(table.settle(1, Some(solid_frame(1))));
        assert!(table.is_complete());

        let records = table.records();
        assert_eq!(records[0].status, FrameStatus::Failed);
        assert_eq!(records[1].payload.as_ref().unwrap().data[0], 1);
        assert_eq!(records[2].payload.as_ref().unwrap().data[0], 2);
        assert_eq!(table.loaded_count(), 2);
        assert_eq!(table.failed_count(), 1);
    }

    #[test]
    fn second_outcome_for_slot_is_ignored() {
        let mut table = FrameTable::new(2);
        assert!(table.settle(0, Some(solid_frame(7))));
        assert!(!table.settle(0, None));
        assert_eq!(table.records()[0].status, FrameStatus::Loaded);
        assert_eq!(table.settled_count(), 1);
    }

    #[test]
    fn out_of_range_outcome_is_ignored() {
        let mut table = FrameTable::new(2);
        assert!(!table.settle(2, Some(solid_frame(0))));
        assert_eq!(table.settled_count(), 0);
    }

    #[test]
    fn fail_pending_settles_the_rest() {
        let mut table = FrameTable::new(4);
        table.settle(1, Some(solid_frame(1)));
        assert_eq!(table.fail_pending(), 3);
        assert!(table.is_complete());
        assert_eq!(table.failed_count(), 3);
    }
}
