//! Transactions and the queries that make them up.
//!
//! A [`Transaction`] is an ordered list of [`Query`] values addressed at a
//! named table. This is the unit the [`crate::planner`] partitions and the
//! [`crate::executor`] runs; it sits below the [`crate::query`] façade, which
//! is what a caller not going through the planner would use directly.

use crate::errors::DatabaseResult;
use crate::table::Table;

/// The kind of effect a query has on the primary keys it touches. Two
/// queries whose effects are both [`QueryEffect::Read`] commute; anything
/// else touching the same key must be serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryEffect {
    Create,
    Modify,
    Read,
    Delete,
}

/// A single operation against one named table.
#[derive(Debug, Clone)]
pub enum Query {
    Insert {
        table: String,
        columns: Vec<i64>,
    },
    Update {
        table: String,
        key: i64,
        columns_to_update: Vec<Option<i64>>,
    },
    Select {
        table: String,
        key: i64,
        key_column: usize,
        projection: Vec<u8>,
    },
    SelectVersion {
        table: String,
        key: i64,
        key_column: usize,
        projection: Vec<u8>,
        hops: usize,
    },
    Sum {
        table: String,
        start: i64,
        end: i64,
        column: usize,
    },
    SumVersion {
        table: String,
        start: i64,
        end: i64,
        column: usize,
        hops: usize,
    },
    Delete {
        table: String,
        key: i64,
    },
    Increment {
        table: String,
        key: i64,
        column: usize,
    },
}

impl Query {
    pub fn table(&self) -> &str {
        match self {
            Query::Insert { table, .. }
            | Query::Update { table, .. }
            | Query::Select { table, .. }
            | Query::SelectVersion { table, .. }
            | Query::Sum { table, .. }
            | Query::SumVersion { table, .. }
            | Query::Delete { table, .. }
            | Query::Increment { table, .. } => table,
        }
    }

    pub fn effect(&self) -> QueryEffect {
        match self {
            Query::Insert { .. } => QueryEffect::Create,
            Query::Update { .. } | Query::Increment { .. } => QueryEffect::Modify,
            Query::Select { .. } | Query::SelectVersion { .. } | Query::Sum { .. } | Query::SumVersion { .. } => {
                QueryEffect::Read
            }
            Query::Delete { .. } => QueryEffect::Delete,
        }
    }

    /// The inclusive primary-key range this query reads or writes. A point
    /// query is a range of one key; `Insert` has no pre-existing key to
    /// report since the key doesn't exist until the insert commits.
    pub fn key_range(&self) -> Option<(i64, i64)> {
        match self {
            Query::Insert { .. } => None,
            Query::Update { key, .. }
            | Query::Select { key, .. }
            | Query::SelectVersion { key, .. }
            | Query::Delete { key, .. }
            | Query::Increment { key, .. } => Some((*key, *key)),
            Query::Sum { start, end, .. } | Query::SumVersion { start, end, .. } => Some((*start, *end)),
        }
    }

    /// Run this query against `table`, stashing its result into `out_rows`
    /// (for `Select`/`SelectVersion`) or `out_sum` (for `Sum`/`SumVersion`).
    fn run(&self, table: &Table, out_rows: &mut Option<Vec<Vec<i64>>>, out_sum: &mut Option<i64>) -> DatabaseResult<()> {
        match self {
            Query::Insert { columns, .. } => {
                table.insert_record(columns)?;
            }
            Query::Update { key, columns_to_update, .. } => {
                table.update_record(*key, columns_to_update)?;
            }
            Query::Select { key, key_column, projection, .. } => {
                *out_rows = Some(table.select(*key, *key_column, projection)?);
            }
            Query::SelectVersion { key, key_column, projection, hops, .. } => {
                *out_rows = Some(table.select_version(*key, *key_column, projection, *hops)?);
            }
            Query::Sum { start, end, column, .. } => {
                *out_sum = Some(table.sum(*start, *end, *column)?);
            }
            Query::SumVersion { start, end, column, hops, .. } => {
                *out_sum = Some(table.sum_version(*start, *end, *column, *hops)?);
            }
            Query::Delete { key, .. } => {
                table.delete_record(*key)?;
            }
            Query::Increment { key, column, .. } => {
                table.increment(*key, *column)?;
            }
        }
        Ok(())
    }
}

/// The result of running a single query within a transaction.
#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    pub rows: Option<Vec<Vec<i64>>>,
    pub sum: Option<i64>,
}

/// An ordered list of queries that commit or abort together. There is no
/// rollback: a transaction aborts at the first query that fails, leaving
/// whatever earlier queries already committed in place - queries never
/// partially apply on their own, but a transaction as a whole is not atomic
/// across queries.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    pub queries: Vec<Query>,
    pub try_count: u8,
}

impl Transaction {
    pub fn new() -> Self {
        Transaction::default()
    }

    pub fn add_insert(&mut self, table: impl Into<String>, columns: Vec<i64>) {
        self.queries.push(Query::Insert { table: table.into(), columns });
    }

    pub fn add_update(&mut self, table: impl Into<String>, key: i64, columns_to_update: Vec<Option<i64>>) {
        self.queries.push(Query::Update { table: table.into(), key, columns_to_update });
    }

    pub fn add_select(&mut self, table: impl Into<String>, key: i64, key_column: usize, projection: Vec<u8>) {
        self.queries.push(Query::Select { table: table.into(), key, key_column, projection });
    }

    pub fn add_select_version(
        &mut self,
        table: impl Into<String>,
        key: i64,
        key_column: usize,
        projection: Vec<u8>,
        hops: usize,
    ) {
        self.queries.push(Query::SelectVersion { table: table.into(), key, key_column, projection, hops });
    }

    pub fn add_sum(&mut self, table: impl Into<String>, start: i64, end: i64, column: usize) {
        self.queries.push(Query::Sum { table: table.into(), start, end, column });
    }

    pub fn add_sum_version(&mut self, table: impl Into<String>, start: i64, end: i64, column: usize, hops: usize) {
        self.queries.push(Query::SumVersion { table: table.into(), start, end, column, hops });
    }

    pub fn add_delete(&mut self, table: impl Into<String>, key: i64) {
        self.queries.push(Query::Delete { table: table.into(), key });
    }

    pub fn add_increment(&mut self, table: impl Into<String>, key: i64, column: usize) {
        self.queries.push(Query::Increment { table: table.into(), key, column });
    }

    /// Run every query against whatever `lookup` resolves its table name
    /// to, stopping at the first failure. Returns one [`QueryOutcome`] per
    /// query that ran - a failure after `n` successes yields a vector of
    /// length `n` - plus whether the whole transaction committed.
    pub fn run(&mut self, lookup: impl Fn(&str) -> Option<std::sync::Arc<Table>>) -> (Vec<QueryOutcome>, bool) {
        let mut outcomes = Vec::with_capacity(self.queries.len());
        self.try_count = self.try_count.saturating_add(1);
        for query in &self.queries {
            let table = match lookup(query.table()) {
                Some(t) => t,
                None => return (outcomes, false),
            };
            let mut rows = None;
            let mut sum = None;
            if query.run(&table, &mut rows, &mut sum).is_err() {
                return (outcomes, false);
            }
            outcomes.push(QueryOutcome { rows, sum });
        }
        (outcomes, true)
    }
}
