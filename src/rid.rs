//! Record identifiers and the allocator that mints them.
//!
//! A RID is a non-zero `i64`. Positive values name base records and climb
//! from [`START_BASE_RID`]; negative values name tail records and descend
//! from [`START_TAIL_RID`]. Both streams are handed out in batches of
//! [`CELLS_PER_PAGE`] so that a RID's page and slot can be recovered with
//! pure arithmetic instead of a lookup - see [`slot_of`] and
//! [`page_batch_start`].

use std::sync::Mutex;

use crate::constants::{CELLS_PER_PAGE, START_BASE_RID, START_TAIL_RID};

/// A record identifier. Never zero; sign indicates base (+) vs tail (-).
pub type Rid = i64;

/// Slot index of `rid` within whichever physical/logical page holds it.
///
/// `slot_of(rid) = (|rid| - 1) mod CELLS_PER_PAGE`
pub fn slot_of(rid: Rid) -> usize {
    debug_assert_ne!(rid, 0, "RID 0 is never valid");
    ((rid.unsigned_abs() as usize) - 1) % CELLS_PER_PAGE
}

/// The first RID of the batch that `rid` belongs to - i.e. the RID that was
/// written into slot 0 of the same logical page.
///
/// `starting_rid_of(rid) = sign(rid) * (((|rid| - 1) / CELLS_PER_PAGE) * CELLS_PER_PAGE + 1)`
pub fn page_batch_start(rid: Rid) -> Rid {
    debug_assert_ne!(rid, 0, "RID 0 is never valid");
    let magnitude = rid.unsigned_abs() as usize;
    let start = ((magnitude - 1) / CELLS_PER_PAGE) * CELLS_PER_PAGE + 1;
    if rid > 0 {
        start as Rid
    } else {
        -(start as Rid)
    }
}

/// Zero-based index of the batch (i.e. of the logical page) that `rid`
/// belongs to, counting from the first page ever allocated for that stream.
pub fn batch_index(rid: Rid) -> usize {
    ((rid.unsigned_abs() as usize) - 1) / CELLS_PER_PAGE
}

/// Mints RIDs for the base and tail streams of a single table.
///
/// Exactly one RID is ever issued per logical record; RIDs are never reused,
/// even after a delete. Each stream is guarded by its own mutex so that base
/// inserts and tail updates never contend with each other.
#[derive(Debug)]
pub struct RidAllocator {
    next_base_rid: Mutex<Rid>,
    next_tail_rid: Mutex<Rid>,
}

impl RidAllocator {
    pub fn new() -> Self {
        RidAllocator {
            next_base_rid: Mutex::new(START_BASE_RID),
            next_tail_rid: Mutex::new(START_TAIL_RID),
        }
    }

    /// Reserve the next `CELLS_PER_PAGE` consecutive base RIDs. The returned
    /// vector is ordered so that `batch[slot]` is the RID that belongs in
    /// that slot of the new base page.
    pub fn alloc_base_batch(&self) -> Vec<Rid> {
        let mut next = self.next_base_rid.lock().unwrap();
        let start = *next;
        let batch = (0..CELLS_PER_PAGE as Rid).map(|i| start + i).collect();
        *next = start + CELLS_PER_PAGE as Rid;
        batch
    }

    /// Reserve the next `CELLS_PER_PAGE` consecutive tail RIDs, ordered the
    /// same way as [`RidAllocator::alloc_base_batch`].
    pub fn alloc_tail_batch(&self) -> Vec<Rid> {
        let mut next = self.next_tail_rid.lock().unwrap();
        let start = *next;
        let batch = (0..CELLS_PER_PAGE as Rid).map(|i| start - i).collect();
        *next = start - CELLS_PER_PAGE as Rid;
        batch
    }

    /// The next base and tail RIDs that would be handed out, for persistence.
    pub fn snapshot(&self) -> (Rid, Rid) {
        (*self.next_base_rid.lock().unwrap(), *self.next_tail_rid.lock().unwrap())
    }

    /// Rebuild an allocator that resumes exactly where a snapshot left off.
    pub fn restore(next_base_rid: Rid, next_tail_rid: Rid) -> Self {
        RidAllocator {
            next_base_rid: Mutex::new(next_base_rid),
            next_tail_rid: Mutex::new(next_tail_rid),
        }
    }
}

impl Default for RidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_batch_is_contiguous_ascending() {
        let alloc = RidAllocator::new();
        let first = alloc.alloc_base_batch();
        assert_eq!(first[0], 1);
        assert_eq!(first[CELLS_PER_PAGE - 1], CELLS_PER_PAGE as Rid);

        let second = alloc.alloc_base_batch();
        assert_eq!(second[0], CELLS_PER_PAGE as Rid + 1);
    }

    #[test]
    fn tail_batch_is_contiguous_descending() {
        let alloc = RidAllocator::new();
        let first = alloc.alloc_tail_batch();
        assert_eq!(first[0], -1);
        assert_eq!(first[CELLS_PER_PAGE - 1], -(CELLS_PER_PAGE as Rid));
    }

    #[test]
    fn slot_and_batch_start_round_trip() {
        let alloc = RidAllocator::new();
        let batch = alloc.alloc_base_batch();
        for (slot, &rid) in batch.iter().enumerate() {
            assert_eq!(slot_of(rid), slot);
            assert_eq!(page_batch_start(rid), batch[0]);
        }

        let tail_batch = alloc.alloc_tail_batch();
        for (slot, &rid) in tail_batch.iter().enumerate() {
            assert_eq!(slot_of(rid), slot);
            assert_eq!(page_batch_start(rid), tail_batch[0]);
        }
    }

    #[test]
    fn batch_index_advances_per_page() {
        let alloc = RidAllocator::new();
        let first = alloc.alloc_base_batch();
        let second = alloc.alloc_base_batch();
        assert_eq!(batch_index(first[0]), 0);
        assert_eq!(batch_index(second[0]), 1);
    }
}
