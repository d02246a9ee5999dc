//! Tunable sizes for the page hierarchy. The record layout, page capacity,
//! and page range capacity are all load-bearing for the RID arithmetic in
//! [`crate::rid`], so don't change them without updating that module too.

/// Width, in bytes, of a single column value (a signed 64-bit integer).
pub const ATTRIBUTE_SIZE_BYTES: usize = 8;

/// Size, in bytes, of one physical page.
pub const PHYSICAL_PAGE_BYTES: usize = 4096;

/// Number of cells (records) a physical page can hold: `4096 / 8`.
pub const CELLS_PER_PAGE: usize = PHYSICAL_PAGE_BYTES / ATTRIBUTE_SIZE_BYTES;

/// Maximum number of base pages a single page range may hold.
pub const BASE_PAGES_PER_RANGE: usize = 16;

/// Number of base records a fully-populated page range can hold.
pub const PAGE_RANGE_CAPACITY: usize = BASE_PAGES_PER_RANGE * CELLS_PER_PAGE;

/// First RID ever handed out to a base record.
pub const START_BASE_RID: i64 = 1;

/// First RID ever handed out to a tail record.
pub const START_TAIL_RID: i64 = -1;

/// Sentinel returned by the page range / table insert paths when no RID could
/// be allocated, e.g. because the page range is at capacity.
pub const INVALID_RID: i64 = 0;

/// Defined for parity with the original project; an unimplemented tombstone
/// marker for a future logical-delete feature rather than a hard delete.
#[allow(dead_code)]
pub const LOGICAL_DELETE: i64 = 0;

/// Capacity of the buffer pool, measured in physical pages.
pub const MAX_BUFFERPOOL_SIZE: usize = 10_000;

/// Number of committed updates a page range accumulates before it becomes a
/// candidate for background merge/compaction.
pub const MERGE_THRESHOLD: usize = 50;
