//! Serializable snapshots used to persist a table across a close/open cycle.
//!
//! A table's page ranges, directory, index, and RID allocator state are
//! bundled into one [`TableSnapshot`] and written as a single JSON manifest
//! per table. This is the authoritative on-disk form tables are reloaded
//! from; [`crate::bufferpool`] additionally mirrors every physical page out
//! to a page-granularity layout, for consumers that want to read a table's
//! pages directly rather than through this crate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::index::IndexState;
use crate::page_directory::Address;
use crate::page_range::PageRange;
use crate::rid::Rid;

#[derive(Serialize, Deserialize)]
pub struct TableSnapshot {
    pub name: String,
    pub num_user_columns: usize,
    pub primary_key_column: usize,
    pub page_ranges: Vec<PageRange>,
    pub directory: HashMap<Rid, Address>,
    pub index_state: IndexState,
    pub next_base_rid: Rid,
    pub next_tail_rid: Rid,
    pub dead_rids: Vec<Rid>,
}
