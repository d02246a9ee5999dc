//! The page directory: a concurrent map from RID to the page and slot that
//! physically stores it. Base RIDs are removed from the directory on
//! delete; tail RIDs are left dangling (unreachable from the index, but
//! still resolvable if something else points at them).

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::errors::{DatabaseError, DatabaseResult};
use crate::rid::Rid;

/// Which of a page range's two page vectors a directory entry points into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageKind {
    Base,
    Tail,
}

/// A non-owning pointer to where a record physically lives. The page
/// directory never owns pages - page ranges do - so this is just
/// coordinates, resolved back through `Table::page_ranges` on every lookup.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Address {
    pub range_index: usize,
    pub kind: PageKind,
    pub page_index: usize,
    pub slot: usize,
}

impl Address {
    pub fn new(range_index: usize, kind: PageKind, page_index: usize, slot: usize) -> Self {
        Address {
            range_index,
            kind,
            page_index,
            slot,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PageDirectory {
    entries: Mutex<HashMap<Rid, Address>>,
}

impl PageDirectory {
    pub fn new() -> Self {
        PageDirectory {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Unconditional insert/overwrite - no check that `rid` is already
    /// registered.
    pub fn insert_page(&self, rid: Rid, address: Address) {
        self.entries.lock().unwrap().insert(rid, address);
    }

    pub fn get_page(&self, rid: Rid) -> Option<Address> {
        self.entries.lock().unwrap().get(&rid).copied()
    }

    /// Remove the entry for `rid`, returning its last known address.
    /// Returns an error if the RID was never registered - callers that rely
    /// on invariant 3 (every RID ever returned by insert/update has an
    /// entry) can treat that as a programmer error.
    pub fn delete_page(&self, rid: Rid) -> DatabaseResult<Address> {
        self.entries
            .lock()
            .unwrap()
            .remove(&rid)
            .ok_or(DatabaseError::UnknownRid(rid))
    }

    pub fn contains(&self, rid: Rid) -> bool {
        self.entries.lock().unwrap().contains_key(&rid)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot the directory for persistence.
    pub fn snapshot(&self) -> HashMap<Rid, Address> {
        self.entries.lock().unwrap().clone()
    }

    pub fn restore(entries: HashMap<Rid, Address>) -> Self {
        PageDirectory {
            entries: Mutex::new(entries),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let dir = PageDirectory::new();
        dir.insert_page(1, Address::new(0, PageKind::Base, 0, 0));
        let addr = dir.get_page(1).unwrap();
        assert_eq!(addr.range_index, 0);
        assert_eq!(addr.page_index, 0);
        assert_eq!(addr.slot, 0);
    }

    #[test]
    fn delete_removes_entry() {
        let dir = PageDirectory::new();
        dir.insert_page(1, Address::new(0, PageKind::Base, 0, 0));
        dir.delete_page(1).unwrap();
        assert!(dir.get_page(1).is_none());
    }

    #[test]
    fn delete_missing_rid_errors() {
        let dir = PageDirectory::new();
        assert!(dir.delete_page(99).is_err());
    }
}
