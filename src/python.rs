//! PyO3 bindings: one pyclass per top-level type, wired up through a
//! handful of small `#[pymodule]` functions.
//!
//! The core engine (`Table`, `Transaction`, `Planner`, `Executor`, ...)
//! stays plain Rust so it can be used, tested, and reasoned about without
//! pulling in the Python runtime; this module is a thin adapter layer on
//! top, since pyo3's `#[pymethods]` can't be applied directly to methods
//! that take `impl Into<String>` or return `Box<dyn Trait>`.

use std::sync::Arc;

use pyo3::prelude::*;
use pyo3::wrap_pymodule;

use crate::database::Database as CoreDatabase;
use crate::executor::{Executor as CoreExecutor, TableRegistry};
use crate::planner::Planner as CorePlanner;
use crate::query::Query as CoreQuery;
use crate::table::Table as CoreTable;
use crate::transaction::Transaction as CoreTransaction;

#[pyclass]
pub struct Database {
    inner: CoreDatabase,
}

#[pymethods]
impl Database {
    #[new]
    fn new() -> Self {
        Database { inner: CoreDatabase::new() }
    }

    fn open(&mut self, path: String) -> PyResult<()> {
        self.inner.open(path).map_err(to_py_err)
    }

    fn close(&self) -> PyResult<()> {
        self.inner.close().map_err(to_py_err)
    }

    fn create_table(&mut self, name: String, num_columns: usize, key_index: usize) -> PyResult<Table> {
        let table = self.inner.create_table(name, num_columns, key_index).map_err(to_py_err)?;
        Ok(Table { inner: table })
    }

    fn get_table(&self, name: String) -> Option<Table> {
        self.inner.get_table(&name).map(|inner| Table { inner })
    }

    fn drop_table(&mut self, name: String) -> bool {
        self.inner.drop_table(&name)
    }

    fn table_names(&self) -> Vec<String> {
        self.inner.table_names()
    }
}

#[pyclass]
#[derive(Clone)]
pub struct Table {
    inner: Arc<CoreTable>,
}

#[pymethods]
impl Table {
    fn insert(&self, columns: Vec<i64>) -> bool {
        self.inner.insert_record(&columns).is_ok()
    }

    fn update(&self, key: i64, columns_to_update: Vec<Option<i64>>) -> bool {
        self.inner.update_record(key, &columns_to_update).is_ok()
    }

    fn select(&self, key: i64, key_column: usize, projection: Vec<u8>) -> Option<Vec<Vec<i64>>> {
        self.inner.select(key, key_column, &projection).ok()
    }

    fn select_version(&self, key: i64, key_column: usize, projection: Vec<u8>, hops: usize) -> Option<Vec<Vec<i64>>> {
        self.inner.select_version(key, key_column, &projection, hops).ok()
    }

    fn sum(&self, start: i64, end: i64, column: usize) -> Option<i64> {
        self.inner.sum(start, end, column).ok()
    }

    fn sum_version(&self, start: i64, end: i64, column: usize, hops: usize) -> Option<i64> {
        self.inner.sum_version(start, end, column, hops).ok()
    }

    fn delete(&self, key: i64) -> bool {
        self.inner.delete_record(key).is_ok()
    }

    fn increment(&self, key: i64, column: usize) -> bool {
        self.inner.increment(key, column).is_ok()
    }
}

#[pyclass]
#[derive(Clone)]
pub struct Transaction {
    inner: CoreTransaction,
}

#[pymethods]
impl Transaction {
    #[new]
    fn new() -> Self {
        Transaction { inner: CoreTransaction::new() }
    }

    fn add_insert(&mut self, table: String, columns: Vec<i64>) {
        self.inner.add_insert(table, columns);
    }

    fn add_update(&mut self, table: String, key: i64, columns_to_update: Vec<Option<i64>>) {
        self.inner.add_update(table, key, columns_to_update);
    }

    fn add_select(&mut self, table: String, key: i64, key_column: usize, projection: Vec<u8>) {
        self.inner.add_select(table, key, key_column, projection);
    }

    fn add_delete(&mut self, table: String, key: i64) {
        self.inner.add_delete(table, key);
    }

    fn add_sum(&mut self, table: String, start: i64, end: i64, column: usize) {
        self.inner.add_sum(table, start, end, column);
    }
}

#[pyclass]
pub struct Planner {
    inner: CorePlanner,
}

#[pymethods]
impl Planner {
    #[new]
    fn new(num_threads: usize) -> Self {
        Planner { inner: CorePlanner::new(num_threads) }
    }

    /// Partitions `transactions` into conflict-free queues, returned as a
    /// nested list mirroring the shape `Executor::execute` expects back.
    fn plan(&self, transactions: Vec<Transaction>) -> Vec<Vec<Transaction>> {
        let core_txns = transactions.into_iter().map(|t| t.inner).collect();
        self.inner
            .plan(core_txns)
            .into_iter()
            .map(|group| group.into_iter().map(|inner| Transaction { inner }).collect())
            .collect()
    }
}

#[pyclass]
pub struct Executor {
    inner: CoreExecutor,
}

#[pymethods]
impl Executor {
    #[new]
    fn new(num_threads: usize) -> Self {
        Executor { inner: CoreExecutor::new(num_threads) }
    }

    /// Runs `groups` against `tables`, returning the number of committed
    /// transactions. Per-query results are not exposed to Python - callers
    /// needing row data should use `Table.select`/`Table.sum` directly.
    fn execute(&self, tables: Vec<(String, Table)>, groups: Vec<Vec<Transaction>>) -> usize {
        let registry: TableRegistry = tables.into_iter().map(|(name, table)| (name, table.inner)).collect();
        let core_groups = groups
            .into_iter()
            .map(|group| group.into_iter().map(|t| t.inner).collect())
            .collect();
        let (_, committed) = self.inner.execute(Arc::new(registry), core_groups);
        committed
    }
}

#[pyclass]
pub struct Query {
    inner: CoreQuery,
}

#[pymethods]
impl Query {
    #[new]
    fn new(table: Table) -> Self {
        Query { inner: CoreQuery::new(table.inner) }
    }

    fn insert(&self, columns: Vec<i64>) -> bool {
        self.inner.insert(&columns)
    }

    fn update(&self, key: i64, columns_to_update: Vec<Option<i64>>) -> bool {
        self.inner.update(key, &columns_to_update)
    }

    fn select(&self, key: i64, key_column: usize, projection: Vec<u8>) -> Option<Vec<Vec<i64>>> {
        self.inner.select(key, key_column, &projection)
    }

    fn delete(&self, key: i64) -> bool {
        self.inner.delete(key)
    }
}

fn to_py_err(err: crate::errors::DatabaseError) -> PyErr {
    pyo3::exceptions::PyRuntimeError::new_err(err.to_string())
}

#[pymodule]
fn engine_module(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<Database>()?;
    m.add_class::<Table>()?;
    m.add_class::<Transaction>()?;
    m.add_class::<Planner>()?;
    m.add_class::<Executor>()?;
    m.add_class::<Query>()?;
    Ok(())
}

/// A Python module implemented in Rust.
#[pymodule]
fn lstore_engine(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_wrapped(wrap_pymodule!(engine_module))?;
    Ok(())
}
