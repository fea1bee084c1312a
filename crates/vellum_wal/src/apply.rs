//! Application targets for redo and undo.
//!
//! Replay does not know what a data page means. It only needs a page it
//! can read and stamp with a position, a store that hands pages out by
//! file and index, and an index surface it can push compensating
//! changes through. The traits here are those seams; the in-memory
//! implementations back tests and recovery drills.

use std::collections::{BTreeMap, HashMap};

use crate::error::{WalError, WalResult};
use crate::lsn::Lsn;
use crate::types::{FileId, RecordReference};

/// Bytes reserved at the head of every data page: a 12 byte position
/// stamp plus 4 spare bytes. Payload offsets are relative to this.
pub const PAGE_PAYLOAD_OFFSET: usize = 16;

/// One data page held in memory while a mutation is applied to it.
///
/// The first bytes of the raw page store the position of the last
/// record applied to it; replay compares and stamps it through
/// [`PageHandle::lsn`] and [`PageHandle::set_lsn`]. Everything else is
/// payload, addressed relative to the end of the reserved area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHandle {
    data: Vec<u8>,
}

impl PageHandle {
    /// Creates a zeroed page of `size` bytes. Its position stamp reads
    /// as [`Lsn::ZERO`], older than any record.
    #[must_use]
    pub fn new(size: usize) -> Self {
        debug_assert!(size >= PAGE_PAYLOAD_OFFSET);
        Self {
            data: vec![0u8; size],
        }
    }

    /// Wraps raw page bytes.
    pub fn from_bytes(data: Vec<u8>) -> WalResult<Self> {
        if data.len() < PAGE_PAYLOAD_OFFSET {
            return Err(WalError::invalid_state(format!(
                "page of {} bytes is smaller than the reserved header",
                data.len()
            )));
        }
        Ok(Self { data })
    }

    /// Position of the last record applied to this page.
    #[must_use]
    pub fn lsn(&self) -> Lsn {
        let mut segment = [0u8; 8];
        segment.copy_from_slice(&self.data[0..8]);
        let mut position = [0u8; 4];
        position.copy_from_slice(&self.data[8..12]);
        Lsn::new(u64::from_le_bytes(segment), u32::from_le_bytes(position))
    }

    /// Stamps the page with the position of the record just applied.
    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.data[0..8].copy_from_slice(&lsn.segment.to_le_bytes());
        self.data[8..12].copy_from_slice(&lsn.position.to_le_bytes());
    }

    /// Payload bytes available past the reserved header.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len() - PAGE_PAYLOAD_OFFSET
    }

    fn check_range(&self, offset: usize, len: usize) -> WalResult<usize> {
        let capacity = self.capacity();
        if offset.checked_add(len).is_none_or(|end| end > capacity) {
            return Err(WalError::PageOutOfBounds {
                offset,
                len,
                capacity,
            });
        }
        Ok(PAGE_PAYLOAD_OFFSET + offset)
    }

    /// Reads a little-endian u64 at a payload offset.
    pub fn read_u64(&self, offset: usize) -> WalResult<u64> {
        let at = self.check_range(offset, 8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.data[at..at + 8]);
        Ok(u64::from_le_bytes(bytes))
    }

    /// Writes a little-endian u64 at a payload offset.
    pub fn write_u64(&mut self, offset: usize, value: u64) -> WalResult<()> {
        let at = self.check_range(offset, 8)?;
        self.data[at..at + 8].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Reads payload bytes.
    pub fn read_bytes(&self, offset: usize, len: usize) -> WalResult<&[u8]> {
        let at = self.check_range(offset, len)?;
        Ok(&self.data[at..at + len])
    }

    /// Writes payload bytes.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> WalResult<()> {
        let at = self.check_range(offset, bytes.len())?;
        self.data[at..at + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Raw page bytes, header included.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the handle, returning the raw page bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Store replay reads data pages from and writes them back to.
pub trait PageStore {
    /// Whether the store knows the file at all.
    fn has_file(&self, file: FileId) -> bool;

    /// Reads a page. `None` means the file exists but the page was
    /// never materialized.
    fn read_page(&mut self, file: FileId, page_index: u64) -> WalResult<Option<PageHandle>>;

    /// Writes a page back, materializing it if needed.
    fn write_page(&mut self, file: FileId, page_index: u64, page: &PageHandle) -> WalResult<()>;

    /// Size of pages this store hands out.
    fn page_size(&self) -> usize;
}

/// Surface replay pushes index changes through.
///
/// Single-value entry points return the prior value so replay can check
/// it against the recorded expectation. Multi-value entry points have
/// set semantics: adding an entry twice keeps one copy.
pub trait IndexStorage {
    /// Sets the value under a key, returning the previous one.
    fn put_value(
        &mut self,
        index: u32,
        key: Option<&[u8]>,
        value: RecordReference,
    ) -> WalResult<Option<RecordReference>>;

    /// Removes the value under a key, returning it.
    fn remove_value(
        &mut self,
        index: u32,
        key: Option<&[u8]>,
    ) -> WalResult<Option<RecordReference>>;

    /// Adds one entry to a multi-value key. Returns `false` when the
    /// entry was already present.
    fn add_entry(
        &mut self,
        index: u32,
        key: Option<&[u8]>,
        value: RecordReference,
    ) -> WalResult<bool>;

    /// Removes one entry from a multi-value key. Returns `false` when
    /// the entry was not present.
    fn remove_entry(
        &mut self,
        index: u32,
        key: Option<&[u8]>,
        value: RecordReference,
    ) -> WalResult<bool>;
}

/// Page store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryPageStore {
    page_size: usize,
    files: HashMap<FileId, BTreeMap<u64, PageHandle>>,
}

impl MemoryPageStore {
    /// Creates a store handing out pages of `page_size` bytes.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            files: HashMap::new(),
        }
    }

    /// Registers a file so pages can be read from and written to it.
    pub fn create_file(&mut self, file: FileId) {
        self.files.entry(file).or_default();
    }

    /// Pages currently materialized in a file.
    #[must_use]
    pub fn page_count(&self, file: FileId) -> usize {
        self.files.get(&file).map_or(0, BTreeMap::len)
    }
}

impl PageStore for MemoryPageStore {
    fn has_file(&self, file: FileId) -> bool {
        self.files.contains_key(&file)
    }

    fn read_page(&mut self, file: FileId, page_index: u64) -> WalResult<Option<PageHandle>> {
        Ok(self
            .files
            .get(&file)
            .and_then(|pages| pages.get(&page_index))
            .cloned())
    }

    fn write_page(&mut self, file: FileId, page_index: u64, page: &PageHandle) -> WalResult<()> {
        let Some(pages) = self.files.get_mut(&file) else {
            return Err(WalError::invalid_state(format!(
                "write to unknown {file}"
            )));
        };
        pages.insert(page_index, page.clone());
        Ok(())
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

type IndexKey = (u32, Option<Vec<u8>>);

/// Index storage backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryIndexStorage {
    values: HashMap<IndexKey, RecordReference>,
    entries: HashMap<IndexKey, Vec<RecordReference>>,
}

impl MemoryIndexStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current single value under a key.
    #[must_use]
    pub fn value(&self, index: u32, key: Option<&[u8]>) -> Option<RecordReference> {
        self.values.get(&(index, key.map(<[u8]>::to_vec))).copied()
    }

    /// Current multi-value entries under a key.
    #[must_use]
    pub fn entries(&self, index: u32, key: Option<&[u8]>) -> Vec<RecordReference> {
        self.entries
            .get(&(index, key.map(<[u8]>::to_vec)))
            .cloned()
            .unwrap_or_default()
    }
}

impl IndexStorage for MemoryIndexStorage {
    fn put_value(
        &mut self,
        index: u32,
        key: Option<&[u8]>,
        value: RecordReference,
    ) -> WalResult<Option<RecordReference>> {
        Ok(self.values.insert((index, key.map(<[u8]>::to_vec)), value))
    }

    fn remove_value(
        &mut self,
        index: u32,
        key: Option<&[u8]>,
    ) -> WalResult<Option<RecordReference>> {
        Ok(self.values.remove(&(index, key.map(<[u8]>::to_vec))))
    }

    fn add_entry(
        &mut self,
        index: u32,
        key: Option<&[u8]>,
        value: RecordReference,
    ) -> WalResult<bool> {
        let entries = self
            .entries
            .entry((index, key.map(<[u8]>::to_vec)))
            .or_default();
        if entries.contains(&value) {
            return Ok(false);
        }
        entries.push(value);
        Ok(true)
    }

    fn remove_entry(
        &mut self,
        index: u32,
        key: Option<&[u8]>,
        value: RecordReference,
    ) -> WalResult<bool> {
        let Some(entries) = self.entries.get_mut(&(index, key.map(<[u8]>::to_vec))) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|entry| *entry != value);
        Ok(entries.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_page_reads_as_zero_lsn() {
        let page = PageHandle::new(256);
        assert_eq!(page.lsn(), Lsn::ZERO);
        assert_eq!(page.capacity(), 256 - PAGE_PAYLOAD_OFFSET);
    }

    #[test]
    fn lsn_stamp_round_trips() {
        let mut page = PageHandle::new(128);
        page.set_lsn(Lsn::new(3, 4118));
        assert_eq!(page.lsn(), Lsn::new(3, 4118));
        // Stamping does not disturb the payload.
        assert_eq!(page.read_u64(0).unwrap(), 0);
    }

    #[test]
    fn payload_accessors_are_relative() {
        let mut page = PageHandle::new(128);
        page.write_u64(8, 0xdead_beef).unwrap();
        assert_eq!(page.read_u64(8).unwrap(), 0xdead_beef);

        page.write_bytes(32, b"abc").unwrap();
        assert_eq!(page.read_bytes(32, 3).unwrap(), b"abc");

        // Raw byte 16+8 holds the low byte of the u64.
        assert_eq!(page.as_bytes()[PAGE_PAYLOAD_OFFSET + 8], 0xef);
    }

    #[test]
    fn out_of_bounds_access_is_rejected() {
        let mut page = PageHandle::new(64);
        let capacity = page.capacity();
        assert!(matches!(
            page.read_u64(capacity),
            Err(WalError::PageOutOfBounds { .. })
        ));
        assert!(page.write_u64(capacity - 8, 1).is_ok());
        assert!(page.write_u64(capacity - 7, 1).is_err());
    }

    #[test]
    fn from_bytes_rejects_tiny_pages() {
        assert!(PageHandle::from_bytes(vec![0u8; 8]).is_err());
        assert!(PageHandle::from_bytes(vec![0u8; 64]).is_ok());
    }

    #[test]
    fn memory_store_round_trips_pages() {
        let mut store = MemoryPageStore::new(128);
        let file = FileId::new(1);
        store.create_file(file);
        assert!(store.has_file(file));
        assert!(!store.has_file(FileId::new(2)));

        assert!(store.read_page(file, 0).unwrap().is_none());

        let mut page = PageHandle::new(128);
        page.write_u64(0, 77).unwrap();
        store.write_page(file, 0, &page).unwrap();

        let back = store.read_page(file, 0).unwrap().unwrap();
        assert_eq!(back.read_u64(0).unwrap(), 77);
        assert_eq!(store.page_count(file), 1);
    }

    #[test]
    fn memory_index_single_values() {
        let mut storage = MemoryIndexStorage::new();
        let value = RecordReference::new(12, 38);

        assert_eq!(storage.put_value(45, Some(b"key"), value).unwrap(), None);
        assert_eq!(storage.value(45, Some(b"key")), Some(value));

        let replaced = RecordReference::new(12, 40);
        assert_eq!(
            storage.put_value(45, Some(b"key"), replaced).unwrap(),
            Some(value)
        );
        assert_eq!(
            storage.remove_value(45, Some(b"key")).unwrap(),
            Some(replaced)
        );
        assert_eq!(storage.value(45, Some(b"key")), None);
    }

    #[test]
    fn memory_index_null_keys_are_distinct() {
        let mut storage = MemoryIndexStorage::new();
        let a = RecordReference::new(1, 1);
        let b = RecordReference::new(2, 2);

        storage.put_value(9, None, a).unwrap();
        storage.put_value(9, Some(b""), b).unwrap();

        assert_eq!(storage.value(9, None), Some(a));
        assert_eq!(storage.value(9, Some(b"")), Some(b));
    }

    #[test]
    fn memory_index_entries_have_set_semantics() {
        let mut storage = MemoryIndexStorage::new();
        let value = RecordReference::new(3, 5);

        assert!(storage.add_entry(7, Some(b"k"), value).unwrap());
        assert!(!storage.add_entry(7, Some(b"k"), value).unwrap());
        assert_eq!(storage.entries(7, Some(b"k")), vec![value]);

        assert!(storage.remove_entry(7, Some(b"k"), value).unwrap());
        assert!(!storage.remove_entry(7, Some(b"k"), value).unwrap());
        assert!(storage.entries(7, Some(b"k")).is_empty());
    }
}
