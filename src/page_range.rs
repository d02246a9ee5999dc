//! Page ranges: the unit that owns a bounded run of base pages and an
//! unbounded chain of tail pages, and that implements the update protocol -
//! cumulative tail construction, schema-encoding bitmap, and the
//! base/tail indirection cycle.
//!
//! A page range never talks to the index or the primary key; it only knows
//! about RIDs, slots, and the shared [`PageDirectory`] / [`RidAllocator`] it
//! is handed on every call. This keeps it safe to run many page ranges
//! concurrently, one per worker, as the planner/executor expect.

use serde::{Deserialize, Serialize};

use crate::constants::BASE_PAGES_PER_RANGE;
use crate::errors::{DatabaseError, DatabaseResult};
use crate::page::{BasePage, LogicalPage, TailPage};
use crate::page_directory::{Address, PageDirectory, PageKind};
use crate::rid::Rid;
use crate::rid::RidAllocator;
use crate::schema::{MetadataColumn, Schema};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageRange {
    schema: Schema,
    base_pages: Vec<BasePage>,
    tail_pages: Vec<TailPage>,
    /// Number of tail records appended since the last merge - a trigger for
    /// background compaction, not a correctness-relevant count.
    num_updates: usize,
}

impl PageRange {
    pub fn new(schema: Schema, rid_allocator: &RidAllocator) -> Self {
        let base_batch = rid_allocator.alloc_base_batch();
        let tail_batch = rid_allocator.alloc_tail_batch();
        PageRange {
            schema,
            base_pages: vec![LogicalPage::new(schema.total_columns(), base_batch)],
            tail_pages: vec![LogicalPage::new(schema.total_columns(), tail_batch)],
            num_updates: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.base_pages.len() == BASE_PAGES_PER_RANGE && self.base_pages.last().unwrap().is_full()
    }

    pub fn num_updates(&self) -> usize {
        self.num_updates
    }

    pub fn reset_update_counter(&mut self) {
        self.num_updates = 0;
    }

    fn read_column_at(&self, addr: Address, column_index: usize) -> DatabaseResult<i64> {
        match addr.kind {
            PageKind::Base => self.base_pages[addr.page_index].read_column(column_index, addr.slot),
            PageKind::Tail => self.tail_pages[addr.page_index].read_column(column_index, addr.slot),
        }
    }

    fn read_row_at(&self, addr: Address, projection: &[u8]) -> DatabaseResult<Vec<i64>> {
        match addr.kind {
            PageKind::Base => self.base_pages[addr.page_index].read_row(addr.slot, projection),
            PageKind::Tail => self.tail_pages[addr.page_index].read_row(addr.slot, projection),
        }
    }

    /// Insert a new base record. `user_columns` must have length
    /// `schema.num_user_columns`. Returns `Err(PageRangeFilled)` if this
    /// range is already at capacity - the caller (the table) is expected to
    /// allocate a fresh range and retry.
    pub fn insert_base(
        &mut self,
        range_index: usize,
        user_columns: &[i64],
        rid_allocator: &RidAllocator,
        directory: &PageDirectory,
        timestamp: i64,
    ) -> DatabaseResult<Rid> {
        if self.is_full() {
            return Err(DatabaseError::PageRangeFilled);
        }

        if self.base_pages.last().unwrap().is_full() {
            if self.base_pages.len() >= BASE_PAGES_PER_RANGE {
                return Err(DatabaseError::PageRangeFilled);
            }
            let batch = rid_allocator.alloc_base_batch();
            self.base_pages.push(LogicalPage::new(self.schema.total_columns(), batch));
        }

        let schema = self.schema;
        let page_index = self.base_pages.len() - 1;
        let page = &mut self.base_pages[page_index];
        // The RID is already known before the write - batches are
        // pre-allocated - so the indirection/RID metadata columns can be
        // filled in on the very first write instead of needing a follow-up
        // in-place patch.
        let slot = page.len();
        let rid = page.rid_at(slot);

        let mut row = vec![0i64; schema.total_columns()];
        row[..user_columns.len()].copy_from_slice(user_columns);
        row[schema.meta_index(MetadataColumn::Indirection)] = rid; // cycle closes on itself
        row[schema.meta_index(MetadataColumn::SchemaEncoding)] = 0;
        row[schema.meta_index(MetadataColumn::Rid)] = rid;
        row[schema.meta_index(MetadataColumn::Timestamp)] = timestamp;

        let (assigned_rid, assigned_slot) = page.insert_record(&row)?;
        debug_assert_eq!(assigned_rid, rid);
        debug_assert_eq!(assigned_slot, slot);

        directory.insert_page(rid, Address::new(range_index, PageKind::Base, page_index, slot));
        Ok(rid)
    }

    /// Build and append a cumulative tail record for `base_rid`, then
    /// repoint the base record's indirection to it. `columns_to_update[i]`
    /// of `None` means "inherit the current latest value" for column `i`.
    pub fn update(
        &mut self,
        range_index: usize,
        base_rid: Rid,
        columns_to_update: &[Option<i64>],
        rid_allocator: &RidAllocator,
        directory: &PageDirectory,
        timestamp: i64,
    ) -> DatabaseResult<Rid> {
        if columns_to_update.len() != self.schema.num_user_columns {
            return Err(DatabaseError::ProjectionLengthMismatch {
                expected: self.schema.num_user_columns,
                actual: columns_to_update.len(),
            });
        }

        let schema = self.schema;
        let indirection_col = schema.meta_index(MetadataColumn::Indirection);

        let base_addr = directory.get_page(base_rid).ok_or(DatabaseError::UnknownRid(base_rid))?;
        let old_indirection = self.read_column_at(base_addr, indirection_col)?;

        let latest_addr = if old_indirection == base_rid {
            base_addr
        } else {
            directory
                .get_page(old_indirection)
                .ok_or(DatabaseError::UnknownRid(old_indirection))?
        };

        let latest_user_columns: Vec<i64> = (0..schema.num_user_columns)
            .map(|c| self.read_column_at(latest_addr, c))
            .collect::<DatabaseResult<_>>()?;

        // Build the cumulative new values and the schema-encoding bitmap.
        // Column 0 is the most-significant bit, matching the original
        // `''.join(...)` + `int(_, 2)` convention.
        let mut new_values = vec![0i64; schema.num_user_columns];
        let mut mask: i64 = 0;
        for i in 0..schema.num_user_columns {
            match columns_to_update[i] {
                Some(value) => {
                    new_values[i] = value;
                    mask |= 1 << (schema.num_user_columns - 1 - i);
                }
                None => new_values[i] = latest_user_columns[i],
            }
        }

        if self.tail_pages.last().unwrap().is_full() {
            let batch = rid_allocator.alloc_tail_batch();
            self.tail_pages.push(LogicalPage::new(schema.total_columns(), batch));
        }

        let tail_page_index = self.tail_pages.len() - 1;
        let tail_page = &mut self.tail_pages[tail_page_index];
        let slot = tail_page.len();
        let new_tail_rid = tail_page.rid_at(slot);

        let mut row = vec![0i64; schema.total_columns()];
        row[..schema.num_user_columns].copy_from_slice(&new_values);
        row[indirection_col] = old_indirection; // chain link toward the previous version
        row[schema.meta_index(MetadataColumn::SchemaEncoding)] = mask;
        row[schema.meta_index(MetadataColumn::Rid)] = new_tail_rid;
        row[schema.meta_index(MetadataColumn::Timestamp)] = timestamp;

        let (assigned_rid, assigned_slot) = tail_page.insert_record(&row)?;
        debug_assert_eq!(assigned_rid, new_tail_rid);
        debug_assert_eq!(assigned_slot, slot);

        directory.insert_page(
            new_tail_rid,
            Address::new(range_index, PageKind::Tail, tail_page_index, slot),
        );

        // Commit point: only after the tail record is fully written and
        // registered do we repoint the base record. If this overwrite never
        // happens the whole update is invisible - there is no partial state
        // a reader can observe.
        self.base_pages[base_addr.page_index].overwrite_column(indirection_col, base_addr.slot, new_tail_rid)?;

        self.num_updates += 1;
        Ok(new_tail_rid)
    }

    /// O(1) read of the latest version of `base_rid` - one indirection hop,
    /// then a column read.
    pub fn read_latest(
        &self,
        base_rid: Rid,
        directory: &PageDirectory,
        projection: &[u8],
    ) -> DatabaseResult<Vec<i64>> {
        let addr = directory.get_page(base_rid).ok_or(DatabaseError::UnknownRid(base_rid))?;
        let indirection_col = self.schema.meta_index(MetadataColumn::Indirection);
        let indirection = self.read_column_at(addr, indirection_col)?;

        let latest_addr = if indirection == base_rid {
            addr
        } else {
            directory.get_page(indirection).ok_or(DatabaseError::UnknownRid(indirection))?
        };

        self.read_row_at(latest_addr, projection)
    }

    pub fn get_latest_column_value(&self, base_rid: Rid, directory: &PageDirectory, column_index: usize) -> DatabaseResult<i64> {
        let mut projection = vec![0u8; self.schema.total_columns()];
        projection[column_index] = 1;
        Ok(self.read_latest(base_rid, directory, &projection)?[0])
    }

    /// Collect the tail chain for `base_rid`, newest first, stopping when
    /// the chain loops back to the base record.
    pub fn tail_chain(&self, base_rid: Rid, directory: &PageDirectory) -> DatabaseResult<Vec<Rid>> {
        let base_addr = directory.get_page(base_rid).ok_or(DatabaseError::UnknownRid(base_rid))?;
        let indirection_col = self.schema.meta_index(MetadataColumn::Indirection);

        let mut chain = Vec::new();
        let mut current_rid = self.read_column_at(base_addr, indirection_col)?;
        while current_rid != base_rid {
            chain.push(current_rid);
            let addr = directory.get_page(current_rid).ok_or(DatabaseError::UnknownRid(current_rid))?;
            current_rid = self.read_column_at(addr, indirection_col)?;
        }
        Ok(chain)
    }

    /// Read `base_rid` as of `hops` updates ago (0 = latest). Any `hops`
    /// past the number of updates ever applied clamps to the base record.
    pub fn read_version(
        &self,
        base_rid: Rid,
        directory: &PageDirectory,
        hops: usize,
        projection: &[u8],
    ) -> DatabaseResult<Vec<i64>> {
        let base_addr = directory.get_page(base_rid).ok_or(DatabaseError::UnknownRid(base_rid))?;
        let chain = self.tail_chain(base_rid, directory)?;

        let target_addr = if hops == 0 {
            match chain.first() {
                Some(&rid) => directory.get_page(rid).ok_or(DatabaseError::UnknownRid(rid))?,
                None => base_addr,
            }
        } else if hops >= chain.len() {
            base_addr
        } else {
            let rid = chain[hops];
            directory.get_page(rid).ok_or(DatabaseError::UnknownRid(rid))?
        };

        self.read_row_at(target_addr, projection)
    }

    /// Every base RID stored in this range, in page/slot order.
    pub fn base_rids(&self) -> Vec<Rid> {
        let mut rids = Vec::new();
        for page in &self.base_pages {
            for slot in 0..page.len() {
                rids.push(page.rid_at(slot));
            }
        }
        rids
    }

    pub fn base_page_count(&self) -> usize {
        self.base_pages.len()
    }

    pub fn tail_page_count(&self) -> usize {
        self.tail_pages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(num_user_columns: usize) -> (PageRange, RidAllocator, PageDirectory) {
        let schema = Schema::new(num_user_columns);
        let alloc = RidAllocator::new();
        let range = PageRange::new(schema, &alloc);
        (range, alloc, PageDirectory::new())
    }

    #[test]
    fn insert_closes_its_own_cycle() {
        let (mut range, alloc, dir) = setup(3);
        let rid = range.insert_base(0, &[1, 2, 3], &alloc, &dir, 0).unwrap();
        let chain = range.tail_chain(rid, &dir).unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn update_builds_cumulative_tail_and_mask() {
        let (mut range, alloc, dir) = setup(3);
        let rid = range.insert_base(0, &[1, 2, 3], &alloc, &dir, 0).unwrap();

        range.update(0, rid, &[None, Some(5), None], &alloc, &dir, 1).unwrap();
        let latest = range
            .read_latest(rid, &dir, &vec![1; 6])
            .unwrap();
        // [col0, col1, col2, schema_encoding, rid, timestamp]
        assert_eq!(&latest[0..3], &[1, 5, 3]);
        // column 1 out of 3 updated -> bit index (3-1-1)=1 set -> mask = 0b010 = 2
        assert_eq!(latest[3], 2);
    }

    #[test]
    fn select_version_walks_backward_and_clamps_to_base() {
        let (mut range, alloc, dir) = setup(3);
        let rid = range.insert_base(0, &[1, 2, 3], &alloc, &dir, 0).unwrap();
        range.update(0, rid, &[None, Some(5), None], &alloc, &dir, 1).unwrap();
        range.update(0, rid, &[None, Some(7), Some(2)], &alloc, &dir, 2).unwrap();
        range.update(0, rid, &[Some(9), None, None], &alloc, &dir, 3).unwrap();

        let proj = vec![1, 1, 1, 0, 0, 0];
        assert_eq!(&range.read_version(rid, &dir, 0, &proj).unwrap(), &[9, 7, 2]);
        assert_eq!(&range.read_version(rid, &dir, 1, &proj).unwrap(), &[1, 7, 2]);
        assert_eq!(&range.read_version(rid, &dir, 2, &proj).unwrap(), &[1, 5, 3]);
        assert_eq!(&range.read_version(rid, &dir, 3, &proj).unwrap(), &[1, 2, 3]);
        // Past the chain length, clamp to base.
        assert_eq!(&range.read_version(rid, &dir, 99, &proj).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn range_reports_full_after_capacity_inserts() {
        let (mut range, alloc, dir) = setup(1);
        for i in 0..crate::constants::PAGE_RANGE_CAPACITY {
            range.insert_base(0, &[i as i64], &alloc, &dir, 0).unwrap();
        }
        assert!(range.is_full());
        assert!(matches!(
            range.insert_base(0, &[0], &alloc, &dir, 0),
            Err(DatabaseError::PageRangeFilled)
        ));
    }
}
