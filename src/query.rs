//! The `Query` façade: the surface a caller not going through the
//! planner/executor uses directly.
//!
//! Every method here wraps one `Table` call and converts a raised
//! `DatabaseError` into `false` (or `None` where a value would otherwise be
//! returned), per the policy that this layer never propagates internal
//! failures - callers inside the engine (the executor) still see the
//! `Result` by calling `Table` directly.

use std::sync::Arc;

use crate::table::Table;

/// Binds a single table so repeated calls don't have to re-pass it.
pub struct Query {
    table: Arc<Table>,
}

impl Query {
    pub fn new(table: Arc<Table>) -> Self {
        Query { table }
    }

    pub fn insert(&self, columns: &[i64]) -> bool {
        self.table.insert_record(columns).is_ok()
    }

    pub fn update(&self, key: i64, columns_to_update: &[Option<i64>]) -> bool {
        self.table.update_record(key, columns_to_update).is_ok()
    }

    pub fn select(&self, key: i64, key_column: usize, projection: &[u8]) -> Option<Vec<Vec<i64>>> {
        self.table.select(key, key_column, projection).ok()
    }

    pub fn select_version(&self, key: i64, key_column: usize, projection: &[u8], hops: usize) -> Option<Vec<Vec<i64>>> {
        self.table.select_version(key, key_column, projection, hops).ok()
    }

    pub fn sum(&self, start: i64, end: i64, column: usize) -> Option<i64> {
        self.table.sum(start, end, column).ok()
    }

    pub fn sum_version(&self, start: i64, end: i64, column: usize, hops: usize) -> Option<i64> {
        self.table.sum_version(start, end, column, hops).ok()
    }

    pub fn delete(&self, key: i64) -> bool {
        self.table.delete_record(key).is_ok()
    }

    pub fn increment(&self, key: i64, column: usize) -> bool {
        self.table.increment(key, column).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_surfaces_false_instead_of_propagating_errors() {
        let query = Query::new(Arc::new(Table::new("grades", 2, 0)));
        assert!(query.insert(&[1, 10]));
        assert!(!query.insert(&[1, 99]), "duplicate key must surface as false, not a panic or Err");
        assert!(!query.update(2, &[None, Some(5)]), "missing key must surface as false");
        assert!(query.select(1, 0, &[1, 1]).is_some());
        assert!(query.select(2, 0, &[1, 1]).is_none());
    }

    #[test]
    fn query_round_trips_update_select_delete() {
        let query = Query::new(Arc::new(Table::new("grades", 2, 0)));
        assert!(query.insert(&[1, 10]));
        assert!(query.update(1, &[None, Some(20)]));
        assert_eq!(query.select(1, 0, &[1, 1]).unwrap()[0], vec![1, 20]);
        assert!(query.delete(1));
        assert!(query.select(1, 0, &[1, 1]).is_none());
    }
}
