//! Page-granularity cache and on-disk layout.
//!
//! Tables keep their pages resident in memory (see [`crate::page_range`]) -
//! there is no page fault on the hot insert/update/select path. The
//! bufferpool exists for the slower path: writing a table out to disk and
//! reading it back, one physical page at a time, honoring the pin-counted
//! eviction contract rather than serializing an entire table as a single
//! blob.
//!
//! Layout on disk: each physical page is a fixed 4096-byte cell file, one per
//! column, grouped as `<base_dir>/<table>/range_<r>/{base,tail}_<p>/col_<c>`.
//! The write cursor - how many of those 512 cells are actually populated -
//! isn't representable inside a fixed-width cell file, so it rides alongside
//! in a small `.meta` sidecar rather than inflating the data file.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::constants::{CELLS_PER_PAGE, MAX_BUFFERPOOL_SIZE, PHYSICAL_PAGE_BYTES};
use crate::errors::{DatabaseError, DatabaseResult};
use crate::page::PhysicalPage;
use crate::page_directory::PageKind;

/// Identifies a single physical page (one column of one base/tail page of one
/// range of one table) for both the bufferpool's cache key and the on-disk
/// path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub table: String,
    pub range_index: usize,
    pub kind: PageKind,
    pub page_index: usize,
    pub column: usize,
}

impl PageKey {
    pub fn new(table: &str, range_index: usize, kind: PageKind, page_index: usize, column: usize) -> Self {
        PageKey {
            table: table.to_string(),
            range_index,
            kind,
            page_index,
            column,
        }
    }

    fn dir(&self, base_dir: &Path) -> PathBuf {
        let kind_dir = match self.kind {
            PageKind::Base => format!("base_{}", self.page_index),
            PageKind::Tail => format!("tail_{}", self.page_index),
        };
        base_dir
            .join(&self.table)
            .join(format!("range_{}", self.range_index))
            .join(kind_dir)
    }

    fn data_path(&self, base_dir: &Path) -> PathBuf {
        self.dir(base_dir).join(format!("col_{}", self.column))
    }

    fn meta_path(&self, base_dir: &Path) -> PathBuf {
        self.dir(base_dir).join(format!("col_{}.meta", self.column))
    }
}

/// Raw disk access for physical pages. Knows nothing about pinning or
/// capacity - that's the bufferpool's job.
pub struct DiskManager {
    base_dir: PathBuf,
}

impl DiskManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        DiskManager { base_dir: base_dir.into() }
    }

    pub fn page_exists(&self, key: &PageKey) -> bool {
        key.data_path(&self.base_dir).is_file()
    }

    pub fn read_page(&self, key: &PageKey) -> DatabaseResult<PhysicalPage> {
        let mut data_file = fs::File::open(key.data_path(&self.base_dir))?;
        let mut bytes = vec![0u8; PHYSICAL_PAGE_BYTES];
        data_file.read_exact(&mut bytes)?;

        let mut cells = [0i64; CELLS_PER_PAGE];
        for (cell, chunk) in cells.iter_mut().zip(bytes.chunks_exact(8)) {
            *cell = i64::from_le_bytes(chunk.try_into().expect("8-byte chunk"));
        }

        let cursor: usize = {
            let meta = fs::read_to_string(key.meta_path(&self.base_dir))?;
            meta.trim().parse().map_err(|_| {
                DatabaseError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, "corrupt page cursor"))
            })?
        };

        Ok(PhysicalPage::from_parts(cells, cursor))
    }

    pub fn write_page(&self, key: &PageKey, page: &PhysicalPage) -> DatabaseResult<()> {
        fs::create_dir_all(key.dir(&self.base_dir))?;

        let mut bytes = Vec::with_capacity(PHYSICAL_PAGE_BYTES);
        for &cell in page.cells() {
            bytes.extend_from_slice(&cell.to_le_bytes());
        }
        fs::File::create(key.data_path(&self.base_dir))?.write_all(&bytes)?;
        fs::write(key.meta_path(&self.base_dir), page.cursor().to_string())?;
        Ok(())
    }
}

struct Frame {
    page: PhysicalPage,
    pin_count: usize,
    dirty: bool,
}

/// A pin-counted, capacity-bounded cache of physical pages backed by a
/// [`DiskManager`].
pub struct BufferPool {
    disk: DiskManager,
    capacity: usize,
    frames: Mutex<HashMap<PageKey, Frame>>,
}

impl BufferPool {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        BufferPool {
            disk: DiskManager::new(base_dir),
            capacity: MAX_BUFFERPOOL_SIZE,
            frames: Mutex::new(HashMap::new()),
        }
    }

    pub fn disk(&self) -> &DiskManager {
        &self.disk
    }

    /// Fetch a page into the pool, pinning it. Reads through to disk on a
    /// cache miss; a page that has never been written to disk comes back
    /// empty rather than erroring, mirroring a fresh in-memory page.
    pub fn get_page(&self, key: &PageKey) -> DatabaseResult<PhysicalPage> {
        let mut frames = self.frames.lock().unwrap();
        if let Some(frame) = frames.get_mut(key) {
            frame.pin_count += 1;
            return Ok(frame.page.clone());
        }
        drop(frames);

        self.evict_if_needed()?;

        let page = if self.disk.page_exists(key) {
            self.disk.read_page(key)?
        } else {
            PhysicalPage::new()
        };

        let mut frames = self.frames.lock().unwrap();
        frames.insert(
            key.clone(),
            Frame {
                page: page.clone(),
                pin_count: 1,
                dirty: false,
            },
        );
        Ok(page)
    }

    /// Overwrite a resident page's contents and mark it dirty so it is
    /// flushed to disk on eviction or explicit flush. The page must already
    /// be pinned via [`BufferPool::get_page`].
    pub fn put_page(&self, key: &PageKey, page: PhysicalPage) {
        let mut frames = self.frames.lock().unwrap();
        if let Some(frame) = frames.get_mut(key) {
            frame.page = page;
            frame.dirty = true;
        }
    }

    pub fn pin(&self, key: &PageKey) {
        if let Some(frame) = self.frames.lock().unwrap().get_mut(key) {
            frame.pin_count += 1;
        }
    }

    pub fn unpin(&self, key: &PageKey) {
        if let Some(frame) = self.frames.lock().unwrap().get_mut(key) {
            frame.pin_count = frame.pin_count.saturating_sub(1);
        }
    }

    /// Evict unpinned frames, flushing dirty ones, until the pool is back
    /// under capacity. A pool that is entirely pinned simply stays over
    /// capacity - there's nothing safe left to throw out.
    pub fn evict_if_needed(&self) -> DatabaseResult<()> {
        let mut frames = self.frames.lock().unwrap();
        if frames.len() < self.capacity {
            return Ok(());
        }

        let victim = frames
            .iter()
            .find(|(_, frame)| frame.pin_count == 0)
            .map(|(key, _)| key.clone());

        if let Some(key) = victim {
            if let Some(frame) = frames.remove(&key) {
                if frame.dirty {
                    self.disk.write_page(&key, &frame.page)?;
                }
            }
        }
        Ok(())
    }

    /// Flush every dirty frame to disk without evicting anything - used when
    /// persisting a table at a clean shutdown.
    pub fn flush_all(&self) -> DatabaseResult<()> {
        let mut frames = self.frames.lock().unwrap();
        for (key, frame) in frames.iter_mut() {
            if frame.dirty {
                self.disk.write_page(key, &frame.page)?;
                frame.dirty = false;
            }
        }
        Ok(())
    }

    pub fn resident_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key() -> PageKey {
        PageKey::new("grades", 0, PageKind::Base, 0, 0)
    }

    #[test]
    fn get_page_on_miss_without_disk_file_is_empty() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(dir.path());
        let page = pool.get_page(&key()).unwrap();
        assert!(page.has_capacity());
    }

    #[test]
    fn write_then_read_page_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let disk = DiskManager::new(dir.path());
        let mut page = PhysicalPage::new();
        page.write(7).unwrap();
        page.write(8).unwrap();
        disk.write_page(&key(), &page).unwrap();

        assert!(disk.page_exists(&key()));
        let loaded = disk.read_page(&key()).unwrap();
        assert_eq!(loaded.read(0).unwrap(), 7);
        assert_eq!(loaded.read(1).unwrap(), 8);
    }

    #[test]
    fn pinned_frame_survives_eviction_pressure() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(dir.path());
        pool.get_page(&key()).unwrap(); // pin_count = 1
        pool.evict_if_needed().unwrap();
        assert_eq!(pool.resident_count(), 1);
    }

    #[test]
    fn unpinned_dirty_frame_flushes_on_eviction() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(dir.path());
        let k = key();
        let page = pool.get_page(&k).unwrap();
        pool.put_page(&k, page);
        pool.unpin(&k);

        // Eviction only happens under capacity pressure; flush explicitly
        // here and check the disk file instead of manufacturing 10000 pages.
        pool.flush_all().unwrap();
        assert!(pool.disk().page_exists(&k));
    }
}
