//! The top-level handle a caller opens, creates tables on, and closes.
//!
//! A `Database` owns a directory on disk, a [`BufferPool`] shared by every
//! table it holds, and a name-indexed registry of tables. Closing flushes
//! each table's JSON snapshot plus the bufferpool's resident pages; opening
//! the same directory again reloads every table snapshot found there.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::bufferpool::BufferPool;
use crate::errors::DatabaseResult;
use crate::index::IndexKind;
use crate::persistables::TableSnapshot;
use crate::table::{IndexMode, Table};

const MANIFEST_NAME: &str = "tables.json";

/// Names of every table snapshot present in a database directory, so we
/// know what to reload without having to guess from the filesystem layout.
#[derive(Default, Serialize, Deserialize)]
struct Manifest {
    tables: Vec<String>,
}

fn table_snapshot_path(directory: &Path, name: &str) -> PathBuf {
    directory.join(format!("{name}.table.json"))
}

pub struct Database {
    directory: PathBuf,
    tables: HashMap<String, Arc<Table>>,
    bufferpool: Arc<BufferPool>,
    index_mode: IndexMode,
    loaded: bool,
}

impl Database {
    /// A database with no backing directory yet - call [`Database::open`]
    /// before creating or loading any tables.
    pub fn new() -> Self {
        Database {
            directory: PathBuf::new(),
            tables: HashMap::new(),
            bufferpool: Arc::new(BufferPool::new(PathBuf::new())),
            index_mode: IndexMode::Serial,
            loaded: false,
        }
    }

    /// Point the database at `path`, creating it if necessary, and reload
    /// any table snapshots already there.
    pub fn open(&mut self, path: impl AsRef<Path>) -> DatabaseResult<()> {
        let directory = path.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;
        self.bufferpool = Arc::new(BufferPool::new(directory.clone()));
        self.directory = directory;
        self.tables.clear();

        let manifest_path = self.directory.join(MANIFEST_NAME);
        let manifest: Manifest = if manifest_path.exists() {
            let raw = fs::read_to_string(&manifest_path)?;
            serde_json::from_str(&raw)?
        } else {
            Manifest::default()
        };

        for name in &manifest.tables {
            let snapshot_path = table_snapshot_path(&self.directory, name);
            let raw = fs::read_to_string(&snapshot_path)?;
            let snapshot: TableSnapshot = serde_json::from_str(&raw)?;
            let table = Table::restore(snapshot, self.index_mode);
            self.tables.insert(name.clone(), Arc::new(table));
        }

        info!("opened database at {:?} with {} table(s)", self.directory, self.tables.len());
        self.loaded = true;
        Ok(())
    }

    /// Write every table's snapshot plus the bufferpool's resident pages to
    /// disk, and record the manifest listing them.
    pub fn close(&self) -> DatabaseResult<()> {
        if !self.loaded {
            warn!("closing a database that was never opened; nothing to persist");
            return Ok(());
        }

        for (name, table) in &self.tables {
            let snapshot = table.snapshot();
            let raw = serde_json::to_string(&snapshot)?;
            fs::write(table_snapshot_path(&self.directory, name), raw)?;
        }

        let manifest = Manifest { tables: self.tables.keys().cloned().collect() };
        let raw = serde_json::to_string(&manifest)?;
        fs::write(self.directory.join(MANIFEST_NAME), raw)?;

        self.bufferpool.flush_all()?;
        info!("closed database at {:?}", self.directory);
        Ok(())
    }

    /// Create a new table and register it under `name`. Returns an error if
    /// a table with that name already exists.
    pub fn create_table(&mut self, name: impl Into<String>, num_columns: usize, key_index: usize) -> DatabaseResult<Arc<Table>> {
        let name = name.into();
        if self.tables.contains_key(&name) {
            return Err(crate::errors::DatabaseError::TableAlreadyExists(name));
        }
        let table = Arc::new(Table::with_index_options(
            name.clone(),
            num_columns,
            key_index,
            IndexKind::Sets,
            self.index_mode,
        ));
        self.tables.insert(name, table.clone());
        Ok(table)
    }

    /// Remove a table from the registry. Its on-disk snapshot (if any) is
    /// left in place until the next successful `close`, which only writes
    /// snapshots for tables still registered.
    pub fn drop_table(&mut self, name: &str) -> bool {
        self.tables.remove(name).is_some()
    }

    /// Look up an already-registered table by name.
    pub fn get_table(&self, name: &str) -> Option<Arc<Table>> {
        self.tables.get(name).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn bufferpool(&self) -> Arc<BufferPool> {
        self.bufferpool.clone()
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}
