use lstore_engine::bufferpool::{BufferPool, PageKey};
use lstore_engine::page_directory::PageKind;

#[test]
fn test_simple_write() {
    let dir = tempfile::tempdir().unwrap();
    let pool = BufferPool::new(dir.path());
    let key = PageKey::new("test_tbl", 0, PageKind::Base, 0, 0);

    let mut page = pool.get_page(&key).unwrap();
    let offset = page.write(42).unwrap();
    pool.put_page(&key, page);

    let val_read = pool.get_page(&key).unwrap().read(offset).unwrap();
    assert_eq!(val_read, 42);
}
