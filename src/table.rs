//! The table façade: the top-level surface that coordinates inserts,
//! updates, deletes, and versioned reads across a table's page ranges and
//! its primary/secondary indices.
//!
//! Everything here is `&self` rather than `&mut self` - tables are shared
//! behind an `Arc` so the planner/executor can run many transactions against
//! the same table concurrently. Interior mutability lives one level down, in
//! [`PageDirectory`], [`RidAllocator`], and the index.

use std::sync::Mutex;

use log::{debug, info, warn};

use crate::constants::MERGE_THRESHOLD;
use crate::errors::{DatabaseError, DatabaseResult};
use crate::index::{IndexHandle, IndexKind, SerialIndex, ThreadedIndex};
use crate::page_directory::PageDirectory;
use crate::page_range::PageRange;
use crate::persistables::TableSnapshot;
use crate::rid::{Rid, RidAllocator};
use crate::schema::{MetadataColumn, Schema};

/// Whether a table's index runs synchronously in the caller's thread or on a
/// dedicated worker - see [`crate::index`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexMode {
    Serial,
    Threaded,
}

pub struct Table {
    name: String,
    schema: Schema,
    primary_key_column: usize,
    rid_allocator: RidAllocator,
    directory: PageDirectory,
    page_ranges: Mutex<Vec<PageRange>>,
    index: Box<dyn IndexHandle>,
    dead_rids: Mutex<Vec<Rid>>,
    logical_clock: Mutex<i64>,
}

impl Table {
    pub fn new(name: impl Into<String>, num_user_columns: usize, primary_key_column: usize) -> Self {
        Self::with_index_options(name, num_user_columns, primary_key_column, IndexKind::Sets, IndexMode::Serial)
    }

    pub fn with_index_options(
        name: impl Into<String>,
        num_user_columns: usize,
        primary_key_column: usize,
        index_kind: IndexKind,
        index_mode: IndexMode,
    ) -> Self {
        let schema = Schema::new(num_user_columns);
        let rid_allocator = RidAllocator::new();
        let first_range = PageRange::new(schema, &rid_allocator);

        let index: Box<dyn IndexHandle> = match index_mode {
            IndexMode::Serial => Box::new(SerialIndex::new(num_user_columns, primary_key_column, index_kind)),
            IndexMode::Threaded => Box::new(ThreadedIndex::spawn(num_user_columns, primary_key_column, index_kind)),
        };

        Table {
            name: name.into(),
            schema,
            primary_key_column,
            rid_allocator,
            directory: PageDirectory::new(),
            page_ranges: Mutex::new(vec![first_range]),
            index,
            dead_rids: Mutex::new(Vec::new()),
            logical_clock: Mutex::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_user_columns(&self) -> usize {
        self.schema.num_user_columns
    }

    fn tick(&self) -> i64 {
        let mut clock = self.logical_clock.lock().unwrap();
        *clock += 1;
        *clock
    }

    fn check_projection(&self, columns: &[i64]) -> DatabaseResult<()> {
        if columns.len() != self.schema.num_user_columns {
            return Err(DatabaseError::ProjectionLengthMismatch {
                expected: self.schema.num_user_columns,
                actual: columns.len(),
            });
        }
        Ok(())
    }

    /// Insert a new base record, enforcing primary-key uniqueness via the
    /// index. Grows `page_ranges` by one whenever the last range reports
    /// full.
    pub fn insert_record(&self, columns: &[i64]) -> DatabaseResult<Rid> {
        self.check_projection(columns)?;
        let key = columns[self.primary_key_column];
        if self.index.get_primary(key).is_some() {
            return Err(DatabaseError::DuplicateKey(key));
        }

        let timestamp = self.tick();
        let mut ranges = self.page_ranges.lock().unwrap();
        let mut range_index = ranges.len() - 1;

        let rid = loop {
            match ranges[range_index].insert_base(range_index, columns, &self.rid_allocator, &self.directory, timestamp) {
                Ok(rid) => break rid,
                Err(DatabaseError::PageRangeFilled) => {
                    info!(
                        "table {}: range {} full ({} base pages, {} tail pages), growing a new range",
                        self.name,
                        range_index,
                        ranges[range_index].base_page_count(),
                        ranges[range_index].tail_page_count()
                    );
                    ranges.push(PageRange::new(self.schema, &self.rid_allocator));
                    range_index = ranges.len() - 1;
                }
                Err(other) => return Err(other),
            }
        };
        drop(ranges);

        self.index
            .insert_primary(key, rid)
            .expect("key absence was just checked above and insert_record is the only writer of new keys");
        for (column, &value) in columns.iter().enumerate() {
            self.index.add_secondary(column, value, rid);
        }

        debug!("table {}: inserted rid={} key={}", self.name, rid, key);
        Ok(rid)
    }

    /// Resolve `key` to its base RID and the index of the page range that
    /// owns it.
    fn locate_base(&self, key: i64) -> DatabaseResult<(Rid, usize)> {
        let rid = self.index.get_primary(key).ok_or(DatabaseError::MissingKey(key))?;
        let range_index = self.directory.get_page(rid).ok_or(DatabaseError::UnknownRid(rid))?.range_index;
        Ok((rid, range_index))
    }

    /// Apply a cumulative update. `columns_to_update[i] = None` means "keep
    /// the current latest value of column `i`". Updating the primary-key
    /// column itself rekeys the index to the new value.
    pub fn update_record(&self, key: i64, columns_to_update: &[Option<i64>]) -> DatabaseResult<Rid> {
        if columns_to_update.len() != self.schema.num_user_columns {
            return Err(DatabaseError::ProjectionLengthMismatch {
                expected: self.schema.num_user_columns,
                actual: columns_to_update.len(),
            });
        }

        let (base_rid, range_index) = self.locate_base(key)?;

        if let Some(new_key) = columns_to_update[self.primary_key_column] {
            if new_key != key && self.index.get_primary(new_key).is_some() {
                return Err(DatabaseError::DuplicateKey(new_key));
            }
        }

        let timestamp = self.tick();
        let mut ranges = self.page_ranges.lock().unwrap();
        let all_columns_projection = self.schema.all_columns_projection();
        let old_values = ranges[range_index].read_latest(base_rid, &self.directory, &all_columns_projection)?;

        let new_rid = ranges[range_index].update(
            range_index,
            base_rid,
            columns_to_update,
            &self.rid_allocator,
            &self.directory,
            timestamp,
        )?;

        let num_updates = ranges[range_index].num_updates();
        if num_updates >= MERGE_THRESHOLD {
            // A full background merge/compaction pass is future work; for now
            // just flag the range and reset the counter so we don't spam this
            // on every subsequent update.
            info!("table {}: range {} has accumulated {} updates, eligible for merge", self.name, range_index, num_updates);
            ranges[range_index].reset_update_counter();
        }
        drop(ranges);

        for column in 0..self.schema.num_user_columns {
            if let Some(new_value) = columns_to_update[column] {
                self.index.update_secondary(column, old_values[column], new_value, base_rid);
            }
        }
        if let Some(new_key) = columns_to_update[self.primary_key_column] {
            if new_key != key {
                self.index
                    .rekey_primary(key, new_key, base_rid)
                    .expect("duplicate was already ruled out above");
            }
        }

        debug!("table {}: updated key={} -> new tail rid={}", self.name, key, new_rid);
        Ok(new_rid)
    }

    /// Retire a record: drop its primary-index entry and its base
    /// page-directory entry. Tail versions are left in the directory,
    /// unreachable from the index but not reclaimed until a merge runs.
    pub fn delete_record(&self, key: i64) -> DatabaseResult<()> {
        let base_rid = self.index.delete_primary(key)?;
        let range_index = self.directory.get_page(base_rid).ok_or(DatabaseError::UnknownRid(base_rid))?.range_index;

        let ranges = self.page_ranges.lock().unwrap();
        let projection = self.schema.all_columns_projection();
        let latest_values = ranges[range_index].read_latest(base_rid, &self.directory, &projection)?;
        drop(ranges);

        for column in 0..self.schema.num_user_columns {
            self.index.remove_secondary(column, latest_values[column], base_rid);
        }

        self.directory.delete_page(base_rid)?;
        self.dead_rids.lock().unwrap().push(base_rid);

        debug!("table {}: deleted key={} (dead_rids={})", self.name, key, self.dead_rid_count());
        Ok(())
    }

    /// Read the latest version of every column (user and metadata) for one
    /// base RID, honoring a caller-supplied projection.
    pub fn get_latest_by_rid(&self, rid: Rid, projection: &[u8]) -> DatabaseResult<Vec<i64>> {
        let range_index = self.directory.get_page(rid).ok_or(DatabaseError::UnknownRid(rid))?.range_index;
        let ranges = self.page_ranges.lock().unwrap();
        ranges[range_index].read_latest(rid, &self.directory, projection)
    }

    /// Logical-clock timestamp recorded when `key`'s latest version was
    /// written - the base record's insert time if it has never been updated.
    pub fn record_timestamp(&self, key: i64) -> DatabaseResult<i64> {
        let (rid, _) = self.locate_base(key)?;
        let projection = self.schema.full_projection_with(&[MetadataColumn::Timestamp]);
        let row = self.get_latest_by_rid(rid, &projection)?;
        Ok(row[self.schema.meta_index(MetadataColumn::Timestamp)])
    }

    /// Every base RID matching `value` on `search_column`: uses the
    /// secondary index when one is maintained for that column, the primary
    /// index for the primary-key column, and falls back to a linear scan
    /// otherwise.
    fn rids_matching(&self, search_column: usize, value: i64) -> DatabaseResult<Vec<Rid>> {
        if search_column == self.primary_key_column {
            return Ok(self.index.get_primary(value).into_iter().collect());
        }
        match self.index.locate(search_column, value) {
            Some(rids) => Ok(rids),
            None => self.brute_force_search(search_column, value),
        }
    }

    /// Linear scan of every base record's latest version, for columns with
    /// no secondary index maintained.
    pub fn brute_force_search(&self, column: usize, value: i64) -> DatabaseResult<Vec<Rid>> {
        let mut projection = vec![0u8; self.schema.total_columns()];
        projection[column] = 1;

        let ranges = self.page_ranges.lock().unwrap();
        let mut matches = Vec::new();
        for (range_index, range) in ranges.iter().enumerate() {
            for rid in range.base_rids() {
                if self.directory.get_page(rid).is_none() {
                    // Deleted since the range was built - skip rather than
                    // let the directory miss fail the whole scan.
                    continue;
                }
                let row = ranges[range_index].read_latest(rid, &self.directory, &projection)?;
                if row[0] == value {
                    matches.push(rid);
                }
            }
        }
        Ok(matches)
    }

    /// Select the latest version of every record whose `key_column` equals
    /// `key`, projecting `projection` (length `num_user_columns`).
    pub fn select(&self, key: i64, key_column: usize, projection: &[u8]) -> DatabaseResult<Vec<Vec<i64>>> {
        let full_projection = self.schema.user_projection_to_full(projection);
        let rids = self.rids_matching(key_column, key)?;
        let ranges = self.page_ranges.lock().unwrap();
        let mut rows = Vec::with_capacity(rids.len());
        for rid in rids {
            let range_index = self.directory.get_page(rid).ok_or(DatabaseError::UnknownRid(rid))?.range_index;
            rows.push(ranges[range_index].read_latest(rid, &self.directory, &full_projection)?);
        }
        Ok(rows)
    }

    /// Same as [`Table::select`] but reading `hops` updates in the past
    /// (0 = latest; clamps to the base record past the oldest update).
    pub fn select_version(&self, key: i64, key_column: usize, projection: &[u8], hops: usize) -> DatabaseResult<Vec<Vec<i64>>> {
        let full_projection = self.schema.user_projection_to_full(projection);
        let rids = self.rids_matching(key_column, key)?;
        let ranges = self.page_ranges.lock().unwrap();
        let mut rows = Vec::with_capacity(rids.len());
        for rid in rids {
            let range_index = self.directory.get_page(rid).ok_or(DatabaseError::UnknownRid(rid))?.range_index;
            rows.push(ranges[range_index].read_version(rid, &self.directory, hops, &full_projection)?);
        }
        Ok(rows)
    }

    /// Sum `column` over every base record whose primary key falls in
    /// `[start, end]` (inclusive).
    pub fn sum(&self, start: i64, end: i64, column: usize) -> DatabaseResult<i64> {
        self.sum_version(start, end, column, 0)
    }

    pub fn sum_version(&self, start: i64, end: i64, column: usize, hops: usize) -> DatabaseResult<i64> {
        let mut projection = vec![0u8; self.schema.total_columns()];
        projection[column] = 1;
        let key_projection = {
            let mut p = vec![0u8; self.schema.total_columns()];
            p[self.primary_key_column] = 1;
            p
        };

        let ranges = self.page_ranges.lock().unwrap();
        let mut total: i64 = 0;
        for (range_index, range) in ranges.iter().enumerate() {
            for rid in range.base_rids() {
                if self.directory.get_page(rid).is_none() {
                    continue;
                }
                let key_row = ranges[range_index].read_version(rid, &self.directory, hops, &key_projection)?;
                if key_row[0] < start || key_row[0] > end {
                    continue;
                }
                let value_row = ranges[range_index].read_version(rid, &self.directory, hops, &projection)?;
                total += value_row[0];
            }
        }
        Ok(total)
    }

    /// Read-modify-write increment of a single column.
    pub fn increment(&self, key: i64, column: usize) -> DatabaseResult<Rid> {
        let (base_rid, range_index) = self.locate_base(key)?;
        let current = {
            let ranges = self.page_ranges.lock().unwrap();
            ranges[range_index].get_latest_column_value(base_rid, &self.directory, column)?
        };

        let mut update = vec![None; self.schema.num_user_columns];
        update[column] = Some(current + 1);
        self.update_record(key, &update)
    }

    pub fn create_index(&self, column: usize) {
        if column >= self.schema.num_user_columns {
            warn!("table {}: ignoring create_index for out-of-range column {}", self.name, column);
            return;
        }
        self.index.create_index(column);
    }

    pub fn drop_index(&self, column: usize) {
        self.index.drop_index(column);
    }

    pub fn wait_for_async_responses(&self) {
        self.index.wait_for_async_responses();
    }

    pub fn dead_rid_count(&self) -> usize {
        self.dead_rids.lock().unwrap().len()
    }

    /// Snapshot every piece of state needed to reload this table later.
    pub fn snapshot(&self) -> TableSnapshot {
        let (next_base_rid, next_tail_rid) = self.rid_allocator.snapshot();
        TableSnapshot {
            name: self.name.clone(),
            num_user_columns: self.schema.num_user_columns,
            primary_key_column: self.primary_key_column,
            page_ranges: self.page_ranges.lock().unwrap().clone(),
            directory: self.directory.snapshot(),
            index_state: self.index.snapshot(),
            next_base_rid,
            next_tail_rid,
            dead_rids: self.dead_rids.lock().unwrap().clone(),
        }
    }

    pub fn restore(snapshot: TableSnapshot, index_mode: IndexMode) -> Self {
        let schema = Schema::new(snapshot.num_user_columns);
        let index: Box<dyn IndexHandle> = match index_mode {
            IndexMode::Serial => Box::new(SerialIndex::from_state(snapshot.index_state)),
            IndexMode::Threaded => Box::new(ThreadedIndex::spawn_from_state(snapshot.index_state)),
        };

        Table {
            name: snapshot.name,
            schema,
            primary_key_column: snapshot.primary_key_column,
            rid_allocator: RidAllocator::restore(snapshot.next_base_rid, snapshot.next_tail_rid),
            directory: PageDirectory::restore(snapshot.directory),
            page_ranges: Mutex::new(snapshot.page_ranges),
            index,
            dead_rids: Mutex::new(snapshot.dead_rids),
            logical_clock: Mutex::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grades_table() -> Table {
        // [student_id (key), grade, attendance]
        Table::new("grades", 3, 0)
    }

    #[test]
    fn insert_then_select_round_trips() {
        let table = grades_table();
        table.insert_record(&[1, 90, 12]).unwrap();
        let rows = table.select(1, 0, &[1, 1, 1]).unwrap();
        assert_eq!(rows, vec![vec![1, 90, 12]]);
    }

    #[test]
    fn duplicate_primary_key_is_rejected() {
        let table = grades_table();
        table.insert_record(&[1, 90, 12]).unwrap();
        assert!(matches!(table.insert_record(&[1, 10, 1]), Err(DatabaseError::DuplicateKey(1))));
    }

    #[test]
    fn update_is_cumulative_and_partial() {
        let table = grades_table();
        table.insert_record(&[1, 90, 12]).unwrap();
        table.update_record(1, &[None, Some(95), None]).unwrap();
        let rows = table.select(1, 0, &[1, 1, 1]).unwrap();
        assert_eq!(rows, vec![vec![1, 95, 12]]);
    }

    #[test]
    fn updating_the_primary_key_rekeys_the_index() {
        let table = grades_table();
        table.insert_record(&[1, 90, 12]).unwrap();
        table.update_record(1, &[Some(2), None, None]).unwrap();
        assert!(table.select(1, 0, &[1, 1, 1]).unwrap().is_empty());
        assert_eq!(table.select(2, 0, &[1, 1, 1]).unwrap(), vec![vec![2, 90, 12]]);
    }

    #[test]
    fn delete_removes_record_and_frees_the_key() {
        let table = grades_table();
        table.insert_record(&[1, 90, 12]).unwrap();
        table.delete_record(1).unwrap();
        assert!(table.select(1, 0, &[1, 1, 1]).unwrap().is_empty());
        // The key is free again.
        table.insert_record(&[1, 50, 0]).unwrap();
    }

    #[test]
    fn sum_skips_deleted_records_instead_of_failing_the_whole_scan() {
        let table = grades_table();
        table.insert_record(&[1, 90, 12]).unwrap();
        table.insert_record(&[2, 80, 12]).unwrap();
        table.insert_record(&[3, 70, 12]).unwrap();
        table.delete_record(2).unwrap();
        assert_eq!(table.sum(1, 3, 1).unwrap(), 160);
        assert_eq!(table.sum_version(1, 3, 1, 0).unwrap(), 160);
    }

    #[test]
    fn brute_force_search_skips_deleted_records() {
        let table = grades_table();
        table.insert_record(&[1, 90, 12]).unwrap();
        table.insert_record(&[2, 70, 12]).unwrap();
        table.delete_record(1).unwrap();
        let rids = table.brute_force_search(2, 12).unwrap();
        assert_eq!(rids.len(), 1);
    }

    #[test]
    fn secondary_index_speeds_up_equality_search() {
        let table = grades_table();
        table.create_index(1);
        table.insert_record(&[1, 90, 12]).unwrap();
        table.insert_record(&[2, 90, 5]).unwrap();
        table.insert_record(&[3, 70, 9]).unwrap();

        let mut rows = table.select(90, 1, &[1, 0, 0]).unwrap();
        rows.sort();
        assert_eq!(rows, vec![vec![1], vec![2]]);
    }

    #[test]
    fn record_timestamp_advances_on_update() {
        let table = grades_table();
        table.insert_record(&[1, 90, 12]).unwrap();
        let inserted_at = table.record_timestamp(1).unwrap();
        table.update_record(1, &[None, Some(95), None]).unwrap();
        let updated_at = table.record_timestamp(1).unwrap();
        assert!(updated_at > inserted_at);
    }

    #[test]
    fn brute_force_search_finds_unindexed_columns() {
        let table = grades_table();
        table.insert_record(&[1, 90, 12]).unwrap();
        table.insert_record(&[2, 70, 12]).unwrap();
        let rids = table.brute_force_search(2, 12).unwrap();
        assert_eq!(rids.len(), 2);
    }

    #[test]
    fn sum_ranges_over_primary_key() {
        let table = grades_table();
        table.insert_record(&[1, 90, 12]).unwrap();
        table.insert_record(&[2, 80, 12]).unwrap();
        table.insert_record(&[3, 70, 12]).unwrap();
        assert_eq!(table.sum(1, 2, 1).unwrap(), 170);
    }

    #[test]
    fn increment_reads_then_writes_back() {
        let table = grades_table();
        table.insert_record(&[1, 90, 12]).unwrap();
        table.increment(1, 2).unwrap();
        assert_eq!(table.select(1, 0, &[1, 1, 1]).unwrap(), vec![vec![1, 90, 13]]);
    }

    #[test]
    fn snapshot_and_restore_preserve_data_and_future_inserts() {
        let table = grades_table();
        table.insert_record(&[1, 90, 12]).unwrap();
        table.update_record(1, &[None, Some(91), None]).unwrap();

        let snapshot = table.snapshot();
        let restored = Table::restore(snapshot, IndexMode::Serial);

        assert_eq!(restored.select(1, 0, &[1, 1, 1]).unwrap(), vec![vec![1, 91, 12]]);
        // RID allocation resumes past whatever was already handed out.
        restored.insert_record(&[2, 50, 0]).unwrap();
        assert_eq!(restored.select(2, 0, &[1, 1, 1]).unwrap(), vec![vec![2, 50, 0]]);
    }
}
