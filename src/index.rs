//! Primary and secondary indices.
//!
//! The primary index is a plain hash map from key to base RID, asserting
//! injectivity on insert. Secondary indices map a column's value to the set
//! of base RIDs currently holding that value, kept eventually consistent with
//! the latest version of the column (see [`crate::page_range::PageRange::update`]).
//!
//! Two execution modes share one [`IndexHandle`] trait: [`SerialIndex`] calls
//! straight through in the caller's thread, and [`ThreadedIndex`] owns the
//! index on a dedicated worker thread and talks to it over channels - the
//! index lives in a worker, the table posts updates and drains them on a
//! barrier before any read that must observe them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound::Included;
use std::sync::mpsc::{channel, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};

use crate::errors::{DatabaseError, DatabaseResult};
use crate::rid::Rid;

/// Which concrete structure backs a secondary index. Both behave identically
/// from the outside; the choice only affects how duplicate-insert and
/// iteration order behave internally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// `value -> [RID, ...]` - insertion order preserved, duplicates allowed.
    Arrays,
    /// `value -> {RID}` - unordered, duplicates collapse.
    Sets,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
enum Bucket {
    Array(Vec<Rid>),
    Set(HashSet<Rid>),
}

impl Bucket {
    fn new(kind: IndexKind) -> Self {
        match kind {
            IndexKind::Arrays => Bucket::Array(Vec::new()),
            IndexKind::Sets => Bucket::Set(HashSet::new()),
        }
    }

    fn insert(&mut self, rid: Rid) {
        match self {
            Bucket::Array(v) => v.push(rid),
            Bucket::Set(s) => {
                s.insert(rid);
            }
        }
    }

    fn remove(&mut self, rid: Rid) {
        match self {
            Bucket::Array(v) => v.retain(|&r| r != rid),
            Bucket::Set(s) => {
                s.remove(&rid);
            }
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Bucket::Array(v) => v.is_empty(),
            Bucket::Set(s) => s.is_empty(),
        }
    }

    fn to_vec(&self) -> Vec<Rid> {
        match self {
            Bucket::Array(v) => v.clone(),
            Bucket::Set(s) => s.iter().copied().collect(),
        }
    }
}

/// In-process index state, shared by both execution modes: [`SerialIndex`]
/// wraps one behind a mutex and calls into it directly; [`ThreadedIndex`]
/// moves one onto its worker thread.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexState {
    kind: IndexKind,
    primary_column: usize,
    primary: HashMap<i64, Rid>,
    enabled: Vec<bool>,
    secondary: Vec<BTreeMap<i64, Bucket>>,
}

impl IndexState {
    fn new(num_user_columns: usize, primary_column: usize, kind: IndexKind) -> Self {
        let mut enabled = vec![false; num_user_columns];
        enabled[primary_column] = true;
        IndexState {
            kind,
            primary_column,
            primary: HashMap::new(),
            enabled,
            secondary: vec![BTreeMap::new(); num_user_columns],
        }
    }

    fn insert_primary(&mut self, key: i64, rid: Rid) -> DatabaseResult<()> {
        if self.primary.contains_key(&key) {
            return Err(DatabaseError::DuplicateKey(key));
        }
        self.primary.insert(key, rid);
        Ok(())
    }

    fn get_primary(&self, key: i64) -> Option<Rid> {
        self.primary.get(&key).copied()
    }

    fn delete_primary(&mut self, key: i64) -> DatabaseResult<Rid> {
        self.primary.remove(&key).ok_or(DatabaseError::MissingKey(key))
    }

    fn rekey_primary(&mut self, old_key: i64, new_key: i64, rid: Rid) -> DatabaseResult<()> {
        self.delete_primary(old_key)?;
        self.insert_primary(new_key, rid)
    }

    fn create_index(&mut self, column: usize) {
        self.enabled[column] = true;
    }

    fn drop_index(&mut self, column: usize) {
        if column != self.primary_column {
            self.enabled[column] = false;
            self.secondary[column].clear();
        }
    }

    fn add_secondary(&mut self, column: usize, value: i64, rid: Rid) {
        if !self.enabled[column] {
            return;
        }
        self.secondary[column]
            .entry(value)
            .or_insert_with(|| Bucket::new(self.kind))
            .insert(rid);
    }

    fn remove_secondary(&mut self, column: usize, value: i64, rid: Rid) {
        if !self.enabled[column] {
            return;
        }
        if let Some(bucket) = self.secondary[column].get_mut(&value) {
            bucket.remove(rid);
            if bucket.is_empty() {
                self.secondary[column].remove(&value);
            }
        }
    }

    fn update_secondary(&mut self, column: usize, old_value: i64, new_value: i64, rid: Rid) {
        if old_value == new_value {
            return;
        }
        self.remove_secondary(column, old_value, rid);
        self.add_secondary(column, new_value, rid);
    }

    fn locate(&self, column: usize, value: i64) -> Option<Vec<Rid>> {
        if !self.enabled[column] {
            return None;
        }
        Some(self.secondary[column].get(&value).map(Bucket::to_vec).unwrap_or_default())
    }

    fn locate_range(&self, column: usize, start: i64, end: i64) -> Option<Vec<Rid>> {
        if !self.enabled[column] {
            return None;
        }
        let mut result = Vec::new();
        for bucket in self.secondary[column].range((Included(start), Included(end))).map(|(_, b)| b) {
            result.extend(bucket.to_vec());
        }
        Some(result)
    }
}

/// The operations a table needs from its index, regardless of whether the
/// index runs in the caller's thread or on a dedicated worker.
pub trait IndexHandle: Send + Sync {
    fn insert_primary(&self, key: i64, rid: Rid) -> DatabaseResult<()>;
    fn get_primary(&self, key: i64) -> Option<Rid>;
    fn delete_primary(&self, key: i64) -> DatabaseResult<Rid>;
    fn rekey_primary(&self, old_key: i64, new_key: i64, rid: Rid) -> DatabaseResult<()>;
    fn create_index(&self, column: usize);
    fn drop_index(&self, column: usize);
    fn add_secondary(&self, column: usize, value: i64, rid: Rid);
    fn remove_secondary(&self, column: usize, value: i64, rid: Rid);
    fn update_secondary(&self, column: usize, old_value: i64, new_value: i64, rid: Rid);
    fn locate(&self, column: usize, value: i64) -> Option<Vec<Rid>>;
    fn locate_range(&self, column: usize, start: i64, end: i64) -> Option<Vec<Rid>>;
    /// Block until every index mutation posted so far has been applied.
    /// A no-op for [`SerialIndex`], since calls there are already synchronous.
    fn wait_for_async_responses(&self);
    /// Snapshot the full index state for persistence.
    fn snapshot(&self) -> IndexState;
}

/// Serial mode: the index lives in the same address space as its table, and
/// every call is a direct, synchronous mutation behind a mutex.
pub struct SerialIndex {
    state: Mutex<IndexState>,
}

impl SerialIndex {
    pub fn new(num_user_columns: usize, primary_column: usize, kind: IndexKind) -> Self {
        SerialIndex {
            state: Mutex::new(IndexState::new(num_user_columns, primary_column, kind)),
        }
    }

    pub fn from_state(state: IndexState) -> Self {
        SerialIndex { state: Mutex::new(state) }
    }
}

impl IndexHandle for SerialIndex {
    fn insert_primary(&self, key: i64, rid: Rid) -> DatabaseResult<()> {
        self.state.lock().unwrap().insert_primary(key, rid)
    }
    fn get_primary(&self, key: i64) -> Option<Rid> {
        self.state.lock().unwrap().get_primary(key)
    }
    fn delete_primary(&self, key: i64) -> DatabaseResult<Rid> {
        self.state.lock().unwrap().delete_primary(key)
    }
    fn rekey_primary(&self, old_key: i64, new_key: i64, rid: Rid) -> DatabaseResult<()> {
        self.state.lock().unwrap().rekey_primary(old_key, new_key, rid)
    }
    fn create_index(&self, column: usize) {
        self.state.lock().unwrap().create_index(column)
    }
    fn drop_index(&self, column: usize) {
        self.state.lock().unwrap().drop_index(column)
    }
    fn add_secondary(&self, column: usize, value: i64, rid: Rid) {
        self.state.lock().unwrap().add_secondary(column, value, rid)
    }
    fn remove_secondary(&self, column: usize, value: i64, rid: Rid) {
        self.state.lock().unwrap().remove_secondary(column, value, rid)
    }
    fn update_secondary(&self, column: usize, old_value: i64, new_value: i64, rid: Rid) {
        self.state.lock().unwrap().update_secondary(column, old_value, new_value, rid)
    }
    fn locate(&self, column: usize, value: i64) -> Option<Vec<Rid>> {
        self.state.lock().unwrap().locate(column, value)
    }
    fn locate_range(&self, column: usize, start: i64, end: i64) -> Option<Vec<Rid>> {
        self.state.lock().unwrap().locate_range(column, start, end)
    }
    fn wait_for_async_responses(&self) {}
    fn snapshot(&self) -> IndexState {
        self.state.lock().unwrap().clone()
    }
}

enum Command {
    InsertPrimary(i64, Rid, Sender<DatabaseResult<()>>),
    DeletePrimary(i64, Sender<DatabaseResult<Rid>>),
    RekeyPrimary(i64, i64, Rid, Sender<DatabaseResult<()>>),
    GetPrimary(i64, Sender<Option<Rid>>),
    CreateIndex(usize),
    DropIndex(usize),
    AddSecondary(usize, i64, Rid),
    RemoveSecondary(usize, i64, Rid),
    UpdateSecondary(usize, i64, i64, Rid),
    Locate(usize, i64, Sender<Option<Vec<Rid>>>),
    LocateRange(usize, i64, i64, Sender<Option<Vec<Rid>>>),
    /// Fences the queue: by the time this is processed, every command sent
    /// before it has already run.
    Barrier(Sender<()>),
    Snapshot(Sender<IndexState>),
    Shutdown,
}

/// Threaded ("multiprocessing" in the original terminology) mode: a single
/// worker thread owns the index state. Mutations are posted and forgotten;
/// reads are request/reply; `wait_for_async_responses` posts a barrier
/// command and blocks until the worker reaches it, guaranteeing every
/// previously posted mutation has landed.
pub struct ThreadedIndex {
    sender: Sender<Command>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadedIndex {
    pub fn spawn(num_user_columns: usize, primary_column: usize, kind: IndexKind) -> Self {
        Self::spawn_from_state(IndexState::new(num_user_columns, primary_column, kind))
    }

    pub fn spawn_from_state(initial_state: IndexState) -> Self {
        let (sender, receiver) = channel::<Command>();
        let handle = thread::spawn(move || {
            let mut state = initial_state;
            while let Ok(command) = receiver.recv() {
                match command {
                    Command::InsertPrimary(key, rid, reply) => {
                        let _ = reply.send(state.insert_primary(key, rid));
                    }
                    Command::DeletePrimary(key, reply) => {
                        let _ = reply.send(state.delete_primary(key));
                    }
                    Command::RekeyPrimary(old, new, rid, reply) => {
                        let _ = reply.send(state.rekey_primary(old, new, rid));
                    }
                    Command::GetPrimary(key, reply) => {
                        let _ = reply.send(state.get_primary(key));
                    }
                    Command::CreateIndex(column) => state.create_index(column),
                    Command::DropIndex(column) => state.drop_index(column),
                    Command::AddSecondary(column, value, rid) => state.add_secondary(column, value, rid),
                    Command::RemoveSecondary(column, value, rid) => state.remove_secondary(column, value, rid),
                    Command::UpdateSecondary(column, old, new, rid) => state.update_secondary(column, old, new, rid),
                    Command::Locate(column, value, reply) => {
                        let _ = reply.send(state.locate(column, value));
                    }
                    Command::LocateRange(column, start, end, reply) => {
                        let _ = reply.send(state.locate_range(column, start, end));
                    }
                    Command::Barrier(reply) => {
                        let _ = reply.send(());
                    }
                    Command::Snapshot(reply) => {
                        let _ = reply.send(state.clone());
                    }
                    Command::Shutdown => break,
                }
            }
        });

        ThreadedIndex {
            sender,
            handle: Mutex::new(Some(handle)),
        }
    }
}

impl IndexHandle for ThreadedIndex {
    fn insert_primary(&self, key: i64, rid: Rid) -> DatabaseResult<()> {
        let (tx, rx) = channel();
        self.sender.send(Command::InsertPrimary(key, rid, tx)).expect("index worker alive");
        rx.recv().expect("index worker replies")
    }
    fn get_primary(&self, key: i64) -> Option<Rid> {
        let (tx, rx) = channel();
        self.sender.send(Command::GetPrimary(key, tx)).expect("index worker alive");
        rx.recv().expect("index worker replies")
    }
    fn delete_primary(&self, key: i64) -> DatabaseResult<Rid> {
        let (tx, rx) = channel();
        self.sender.send(Command::DeletePrimary(key, tx)).expect("index worker alive");
        rx.recv().expect("index worker replies")
    }
    fn rekey_primary(&self, old_key: i64, new_key: i64, rid: Rid) -> DatabaseResult<()> {
        let (tx, rx) = channel();
        self.sender
            .send(Command::RekeyPrimary(old_key, new_key, rid, tx))
            .expect("index worker alive");
        rx.recv().expect("index worker replies")
    }
    fn create_index(&self, column: usize) {
        let _ = self.sender.send(Command::CreateIndex(column));
    }
    fn drop_index(&self, column: usize) {
        let _ = self.sender.send(Command::DropIndex(column));
    }
    fn add_secondary(&self, column: usize, value: i64, rid: Rid) {
        let _ = self.sender.send(Command::AddSecondary(column, value, rid));
    }
    fn remove_secondary(&self, column: usize, value: i64, rid: Rid) {
        let _ = self.sender.send(Command::RemoveSecondary(column, value, rid));
    }
    fn update_secondary(&self, column: usize, old_value: i64, new_value: i64, rid: Rid) {
        let _ = self.sender.send(Command::UpdateSecondary(column, old_value, new_value, rid));
    }
    fn locate(&self, column: usize, value: i64) -> Option<Vec<Rid>> {
        let (tx, rx) = channel();
        self.sender.send(Command::Locate(column, value, tx)).expect("index worker alive");
        rx.recv().expect("index worker replies")
    }
    fn locate_range(&self, column: usize, start: i64, end: i64) -> Option<Vec<Rid>> {
        let (tx, rx) = channel();
        self.sender
            .send(Command::LocateRange(column, start, end, tx))
            .expect("index worker alive");
        rx.recv().expect("index worker replies")
    }
    fn wait_for_async_responses(&self) {
        let (tx, rx) = channel();
        self.sender.send(Command::Barrier(tx)).expect("index worker alive");
        rx.recv().expect("index worker replies");
    }
    fn snapshot(&self) -> IndexState {
        let (tx, rx) = channel();
        self.sender.send(Command::Snapshot(tx)).expect("index worker alive");
        rx.recv().expect("index worker replies")
    }
}

impl Drop for ThreadedIndex {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_index_rejects_duplicates() {
        let index = SerialIndex::new(2, 0, IndexKind::Sets);
        index.insert_primary(42, 1).unwrap();
        assert!(matches!(index.insert_primary(42, 2), Err(DatabaseError::DuplicateKey(42))));
    }

    #[test]
    fn secondary_index_is_off_until_created() {
        let index = SerialIndex::new(2, 0, IndexKind::Sets);
        index.add_secondary(1, 100, 5);
        assert!(index.locate(1, 100).is_none());

        index.create_index(1);
        index.add_secondary(1, 100, 5);
        assert_eq!(index.locate(1, 100), Some(vec![5]));
    }

    #[test]
    fn update_secondary_moves_the_rid_between_buckets() {
        let index = SerialIndex::new(1, 0, IndexKind::Sets);
        index.create_index(0);
        index.add_secondary(0, 10, 1);
        index.update_secondary(0, 10, 20, 1);
        assert_eq!(index.locate(0, 10), Some(vec![]));
        assert_eq!(index.locate(0, 20), Some(vec![1]));
    }

    #[test]
    fn locate_range_spans_buckets_in_key_order() {
        let index = SerialIndex::new(1, 0, IndexKind::Arrays);
        index.create_index(0);
        for (value, rid) in [(1, 10), (2, 20), (3, 30), (5, 50)] {
            index.add_secondary(0, value, rid);
        }
        let mut found = index.locate_range(0, 2, 3).unwrap();
        found.sort();
        assert_eq!(found, vec![20, 30]);
    }

    #[test]
    fn threaded_index_barrier_sees_prior_mutations() {
        let index = ThreadedIndex::spawn(1, 0, IndexKind::Sets);
        index.create_index(0);
        for rid in 0..50 {
            index.add_secondary(0, 7, rid);
        }
        index.wait_for_async_responses();
        assert_eq!(index.locate(0, 7).unwrap().len(), 50);
    }
}
