use std::collections::BTreeMap;
use std::io::Write;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::FieldOrder;
use crate::primitives::bytes::stream::{read_u16, read_u32, read_u64, write_u16, write_u32, write_u64};
use crate::primitives::io::{read_optional, remove_if_exists, write_atomic};
use crate::storage::record::{RecordBytes, SearchBounds, KEY_LEN, RECORD_LEN};
use crate::types::{ChecksumReader, ChecksumWriter, QuadStoreError, Result};

pub const INDEX_MAGIC: &[u8; 4] = b"QIDX";
pub const INDEX_VERSION: u16 = 1;
const INDEX_HEADER_LEN: usize = 4 + 2 + 4 + 8;
const INDEX_TRAILER_LEN: usize = 4;

/// One index permutation: every stored quad, ordered by a [`FieldOrder`].
///
/// Entries are keyed by the permuted identifier bytes; the flag byte is the
/// value, so two records differing only in flags occupy the same slot.
/// The whole collection is rewritten to `triples-<order>.dat` on sync.
#[derive(Debug)]
pub struct QuadIndex {
    order: FieldOrder,
    path: PathBuf,
    entries: BTreeMap<[u8; KEY_LEN], u8>,
    dirty: bool,
}

/// Records produced by one bounded step of an index scan.
#[derive(Debug, Default)]
pub struct IndexBatch {
    /// Matching records in index order.
    pub records: Vec<RecordBytes>,
    /// Key to continue after, or `None` once the scan is exhausted.
    pub resume: Option<[u8; KEY_LEN]>,
}

impl QuadIndex {
    /// File name holding the permutation `order`.
    pub fn file_name(order: &FieldOrder) -> String {
        format!("triples-{}.dat", order.name())
    }

    /// Loads the permutation from `dir`, starting empty if no file exists.
    pub fn open(dir: &Path, order: FieldOrder) -> Result<Self> {
        let path = dir.join(Self::file_name(&order));
        let entries = match read_optional(&path)? {
            Some(bytes) => decode_entries(&order, &bytes)?,
            None => BTreeMap::new(),
        };
        debug!(index = %order, records = entries.len(), "index.open");
        Ok(Self {
            order,
            path,
            entries,
            dirty: false,
        })
    }

    /// Sort order of this permutation.
    pub fn order(&self) -> FieldOrder {
        self.order
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the permutation holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if in-memory changes have not been written out.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns the stored record with the same identifiers as `record`.
    pub fn get(&self, record: &RecordBytes) -> Option<RecordBytes> {
        let key = self.order.sort_key(&record.0);
        self.entries
            .get(&key)
            .map(|flags| self.order.record_from_key(&key, *flags))
    }

    /// Inserts `record`, returning the record previously stored under the
    /// same identifiers.
    pub fn insert(&mut self, record: RecordBytes) -> Option<RecordBytes> {
        let key = self.order.sort_key(&record.0);
        let previous = self.entries.insert(key, record.flags());
        if previous != Some(record.flags()) {
            self.dirty = true;
        }
        previous.map(|flags| self.order.record_from_key(&key, flags))
    }

    /// Removes the record with the same identifiers as `record`.
    pub fn remove(&mut self, record: &RecordBytes) -> Option<RecordBytes> {
        let key = self.order.sort_key(&record.0);
        let removed = self.entries.remove(&key)?;
        self.dirty = true;
        Some(self.order.record_from_key(&key, removed))
    }

    /// Removes every record.
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.dirty = true;
        }
    }

    /// All records in index order.
    pub fn iter(&self) -> impl Iterator<Item = RecordBytes> + '_ {
        self.entries
            .iter()
            .map(|(key, flags)| self.order.record_from_key(key, *flags))
    }

    /// Scans at most `limit` keys and returns those matching `bounds`.
    ///
    /// A ranged scan only visits keys between the permuted lower and upper
    /// bounds; otherwise every key is visited. `after` resumes a previous
    /// batch.
    pub fn scan_batch(
        &self,
        bounds: &SearchBounds,
        ranged: bool,
        after: Option<&[u8; KEY_LEN]>,
        limit: usize,
    ) -> IndexBatch {
        let (lower, upper) = if ranged {
            (
                self.order.sort_key(&bounds.min),
                self.order.sort_key(&bounds.max),
            )
        } else {
            ([0u8; KEY_LEN], [0xffu8; KEY_LEN])
        };
        let start = match after {
            Some(key) => Bound::Excluded(*key),
            None => Bound::Included(lower),
        };
        let mut batch = IndexBatch::default();
        let mut examined = 0usize;
        let mut last = None;
        for (key, flags) in self.entries.range((start, Bound::Included(upper))) {
            let record = self.order.record_from_key(key, *flags);
            if bounds.matches(&record) {
                batch.records.push(record);
            }
            examined += 1;
            last = Some(*key);
            if examined == limit {
                break;
            }
        }
        if examined == limit {
            batch.resume = last;
        }
        batch
    }

    /// Writes the permutation to its file if it changed.
    pub fn sync(&mut self, durable: bool) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        write_atomic(&self.path, durable, |out| self.encode(out))?;
        self.dirty = false;
        debug!(index = %self.order, records = self.entries.len(), "index.sync");
        Ok(())
    }

    /// Marks the permutation as changed so the next sync rewrites it.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Deletes the backing file.
    pub fn delete_file(self) -> Result<()> {
        remove_if_exists(&self.path)?;
        debug!(index = %self.order, "index.drop");
        Ok(())
    }

    fn encode<W: Write>(&self, out: &mut W) -> Result<()> {
        let count = u64::try_from(self.entries.len())
            .map_err(|_| QuadStoreError::Invalid("too many records to persist"))?;
        let mut out = ChecksumWriter::new(out);
        out.write_all(INDEX_MAGIC)?;
        write_u16(&mut out, INDEX_VERSION)?;
        out.write_all(self.order.name().as_bytes())?;
        write_u64(&mut out, count)?;
        for record in self.iter() {
            out.write_all(&record.0)?;
        }
        let crc = out.crc();
        write_u32(out.get_mut(), crc)?;
        Ok(())
    }
}

fn decode_entries(order: &FieldOrder, bytes: &[u8]) -> Result<BTreeMap<[u8; KEY_LEN], u8>> {
    if bytes.is_empty() {
        return Ok(BTreeMap::new());
    }
    if bytes.len() < INDEX_HEADER_LEN + INDEX_TRAILER_LEN || &bytes[..4] != INDEX_MAGIC {
        return Err(QuadStoreError::Corruption("index file missing magic header"));
    }
    let mut src = ChecksumReader::new(bytes);
    let mut magic = [0u8; 4];
    std::io::Read::read_exact(&mut src, &mut magic)?;
    if read_u16(&mut src)? != INDEX_VERSION {
        return Err(QuadStoreError::Corruption("unsupported index file version"));
    }
    let mut name = [0u8; 4];
    std::io::Read::read_exact(&mut src, &mut name)?;
    if name != order.name().as_bytes() {
        return Err(QuadStoreError::Corruption("index file holds another permutation"));
    }
    let count = usize::try_from(read_u64(&mut src)?)
        .map_err(|_| QuadStoreError::Corruption("index record count exceeds platform limits"))?;
    let required = count
        .checked_mul(RECORD_LEN)
        .and_then(|n| n.checked_add(INDEX_HEADER_LEN + INDEX_TRAILER_LEN))
        .ok_or(QuadStoreError::Corruption("index record count overflow"))?;
    if bytes.len() != required {
        return Err(QuadStoreError::Corruption("index file truncated"));
    }
    let mut entries = BTreeMap::new();
    let mut record = [0u8; RECORD_LEN];
    for _ in 0..count {
        std::io::Read::read_exact(&mut src, &mut record)?;
        let record = RecordBytes(record);
        entries.insert(order.sort_key(&record.0), record.flags());
    }
    let computed = src.crc();
    if read_u32(src.get_mut())? != computed {
        return Err(QuadStoreError::Corruption("index file checksum mismatch"));
    }
    Ok(entries)
}
