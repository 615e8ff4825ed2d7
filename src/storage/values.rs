//! Interning of RDF terms into the integer identifiers stored in quads.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::model::Term;
use crate::primitives::bytes::stream::{read_u16, read_u32, write_u16, write_u32, StrWidth};
use crate::primitives::io::{read_optional, write_atomic};
use crate::types::{ChecksumReader, ChecksumWriter, QuadStoreError, Result, ValueId};

/// Name of the dictionary file inside a disk store directory.
pub const VALUES_FILE: &str = "values.dat";

const VALUES_MAGIC: &[u8; 4] = b"QVAL";
const VALUES_VERSION: u16 = 2;

/// Maps RDF terms to identifiers and back.
pub trait ValueStore: Send + Sync {
    /// Returns the identifier of `term`, assigning a new one if needed.
    fn store_value(&self, term: &Term) -> Result<ValueId>;
    /// Returns the term behind `id`, if one was assigned.
    fn get_value(&self, id: ValueId) -> Result<Option<Term>>;
    /// Returns the identifier of `term` without assigning one.
    fn get_id(&self, term: &Term) -> Result<Option<ValueId>>;
    /// Persists newly assigned identifiers.
    fn sync(&self) -> Result<()>;
    /// Forgets every term.
    fn clear(&self) -> Result<()>;
}

#[derive(Default)]
struct Dictionary {
    ids: FxHashMap<Term, ValueId>,
    terms: Vec<Term>,
    dirty: bool,
}

/// Append-only term dictionary.
///
/// Identifiers start at 1; 0 is reserved for the null context. When
/// created with a directory, the dictionary loads from and syncs to
/// `values.dat`.
pub struct ValueDictionary {
    path: Option<PathBuf>,
    durable: bool,
    state: RwLock<Dictionary>,
}

impl ValueDictionary {
    /// Dictionary that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            durable: false,
            state: RwLock::new(Dictionary::default()),
        }
    }

    /// Loads `values.dat` from `dir` if present.
    pub fn open(dir: &Path, durable: bool) -> Result<Self> {
        let path = dir.join(VALUES_FILE);
        let mut dict = Dictionary::default();
        if let Some(bytes) = read_optional(&path)? {
            for term in decode_terms(&bytes)? {
                let id = next_id(&dict.terms)?;
                dict.ids.insert(term.clone(), id);
                dict.terms.push(term);
            }
        }
        debug!(path = %path.display(), terms = dict.terms.len(), "values.open");
        Ok(Self {
            path: Some(path),
            durable,
            state: RwLock::new(dict),
        })
    }

    /// Number of interned terms.
    pub fn len(&self) -> usize {
        self.state.read().terms.len()
    }

    /// True if no term has been interned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ValueStore for ValueDictionary {
    fn store_value(&self, term: &Term) -> Result<ValueId> {
        if let Some(id) = self.state.read().ids.get(term) {
            return Ok(*id);
        }
        let mut dict = self.state.write();
        if let Some(id) = dict.ids.get(term) {
            return Ok(*id);
        }
        let id = next_id(&dict.terms)?;
        dict.ids.insert(term.clone(), id);
        dict.terms.push(term.clone());
        dict.dirty = true;
        Ok(id)
    }

    fn get_value(&self, id: ValueId) -> Result<Option<Term>> {
        if id.is_null() {
            return Ok(None);
        }
        Ok(self.state.read().terms.get(id.0 as usize - 1).cloned())
    }

    fn get_id(&self, term: &Term) -> Result<Option<ValueId>> {
        Ok(self.state.read().ids.get(term).copied())
    }

    fn sync(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut dict = self.state.write();
        if !dict.dirty {
            return Ok(());
        }
        write_atomic(path, self.durable, |out| encode_terms(out, &dict.terms))?;
        dict.dirty = false;
        debug!(terms = dict.terms.len(), "values.sync");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut dict = self.state.write();
        dict.ids.clear();
        dict.terms.clear();
        dict.dirty = true;
        Ok(())
    }
}

fn next_id(terms: &[Term]) -> Result<ValueId> {
    u32::try_from(terms.len() + 1)
        .map(ValueId)
        .map_err(|_| QuadStoreError::Invalid("value identifier space exhausted"))
}

fn encode_terms<W: Write>(out: &mut W, terms: &[Term]) -> Result<()> {
    let count = u32::try_from(terms.len())
        .map_err(|_| QuadStoreError::Invalid("too many terms to persist"))?;
    let mut out = ChecksumWriter::new(out);
    out.write_all(VALUES_MAGIC)?;
    write_u16(&mut out, VALUES_VERSION)?;
    write_u32(&mut out, count)?;
    for term in terms {
        term.encode(&mut out, StrWidth::Long)?;
    }
    let crc = out.crc();
    write_u32(out.get_mut(), crc)?;
    Ok(())
}

fn decode_terms(bytes: &[u8]) -> Result<Vec<Term>> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let mut src = ChecksumReader::new(bytes);
    let mut magic = [0u8; 4];
    src.read_exact(&mut magic)?;
    if &magic != VALUES_MAGIC {
        return Err(QuadStoreError::Corruption("value file missing magic header"));
    }
    let width = match read_u16(&mut src)? {
        1 => StrWidth::Short,
        VALUES_VERSION => StrWidth::Long,
        _ => return Err(QuadStoreError::Corruption("unsupported value file version")),
    };
    let count = read_u32(&mut src)?;
    let mut terms = Vec::with_capacity(count.min(1 << 16) as usize);
    for _ in 0..count {
        terms.push(Term::decode(&mut src, width)?);
    }
    let computed = src.crc();
    if read_u32(src.get_mut())? != computed {
        return Err(QuadStoreError::Corruption("value file checksum mismatch"));
    }
    Ok(terms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ids_start_at_one_and_are_stable() {
        let dict = ValueDictionary::in_memory();
        let a = dict.store_value(&Term::uri("urn:a")).unwrap();
        let b = dict.store_value(&Term::literal("b")).unwrap();
        assert_eq!(a, ValueId(1));
        assert_eq!(b, ValueId(2));
        assert_eq!(dict.store_value(&Term::uri("urn:a")).unwrap(), a);
        assert_eq!(dict.get_id(&Term::uri("urn:missing")).unwrap(), None);
        assert_eq!(dict.get_value(b).unwrap(), Some(Term::literal("b")));
        assert_eq!(dict.get_value(ValueId::NULL_CONTEXT).unwrap(), None);
        assert_eq!(dict.get_value(ValueId(99)).unwrap(), None);
    }

    #[test]
    fn persisted_dictionary_reloads() {
        let dir = tempdir().unwrap();
        {
            let dict = ValueDictionary::open(dir.path(), true).unwrap();
            dict.store_value(&Term::uri("urn:a")).unwrap();
            dict.store_value(&Term::lang_literal("chat", "fr")).unwrap();
            dict.store_value(&Term::typed_literal("1", "urn:int")).unwrap();
            dict.sync().unwrap();
        }
        let dict = ValueDictionary::open(dir.path(), true).unwrap();
        assert_eq!(dict.len(), 3);
        assert_eq!(dict.get_id(&Term::typed_literal("1", "urn:int")).unwrap(), Some(ValueId(3)));
        assert_eq!(dict.store_value(&Term::bnode("n1")).unwrap(), ValueId(4));
    }

    #[test]
    fn corrupted_dictionary_rejected() {
        let dir = tempdir().unwrap();
        let dict = ValueDictionary::open(dir.path(), false).unwrap();
        dict.store_value(&Term::uri("urn:a")).unwrap();
        dict.sync().unwrap();
        let path = dir.path().join(VALUES_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        let last_label_byte = bytes.len() - 5;
        bytes[last_label_byte] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            ValueDictionary::open(dir.path(), false),
            Err(QuadStoreError::Corruption(_))
        ));
    }

    #[test]
    fn long_literal_survives_reload() {
        let dir = tempdir().unwrap();
        let long = Term::literal("v".repeat(70_000));
        {
            let dict = ValueDictionary::open(dir.path(), false).unwrap();
            dict.store_value(&long).unwrap();
            dict.sync().unwrap();
            dict.store_value(&Term::uri("urn:after")).unwrap();
            dict.sync().unwrap();
        }
        let dict = ValueDictionary::open(dir.path(), false).unwrap();
        assert_eq!(dict.get_id(&long).unwrap(), Some(ValueId(1)));
        assert_eq!(dict.get_value(ValueId(2)).unwrap(), Some(Term::uri("urn:after")));
    }

    #[test]
    fn version_one_file_still_reads() {
        let terms = [Term::uri("urn:a"), Term::typed_literal("1", "urn:int")];
        let mut bytes = Vec::new();
        {
            let mut out = ChecksumWriter::new(&mut bytes);
            out.write_all(VALUES_MAGIC).unwrap();
            write_u16(&mut out, 1).unwrap();
            write_u32(&mut out, 2).unwrap();
            for term in &terms {
                term.encode(&mut out, StrWidth::Short).unwrap();
            }
            let crc = out.crc();
            write_u32(out.get_mut(), crc).unwrap();
        }
        assert_eq!(decode_terms(&bytes).unwrap(), terms);

        bytes[5] = 3;
        assert!(matches!(decode_terms(&bytes), Err(QuadStoreError::Corruption(_))));
    }
}
