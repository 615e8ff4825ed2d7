//! Fixed-width 17-byte quad records and pattern search bounds.

use crate::primitives::bytes::ord::{get_u32_be, put_u32_be};
use crate::types::{Field, Quad, QuadPattern, QuadRecord, ValueId};

/// Encoded length of one quad record.
pub const RECORD_LEN: usize = 17;
/// Length of the identifier part of a record (flags excluded).
pub const KEY_LEN: usize = 16;

pub const SUBJ_OFFSET: usize = 0;
pub const PRED_OFFSET: usize = 4;
pub const OBJ_OFFSET: usize = 8;
pub const CONTEXT_OFFSET: usize = 12;
pub const FLAG_OFFSET: usize = 16;

/// Flag bit marking an explicit (asserted) statement.
pub const EXPLICIT_FLAG: u8 = 0x1;

/// Byte offset of `field` inside a record.
pub const fn field_offset(field: Field) -> usize {
    field.ordinal() * 4
}

/// A quad record in its on-disk byte layout.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct RecordBytes(pub [u8; RECORD_LEN]);

impl RecordBytes {
    /// Encodes a quad and its explicit flag.
    pub fn encode(record: &QuadRecord) -> Self {
        let mut bytes = [0u8; RECORD_LEN];
        put_u32_be(&mut bytes[SUBJ_OFFSET..], record.quad.subject.0);
        put_u32_be(&mut bytes[PRED_OFFSET..], record.quad.predicate.0);
        put_u32_be(&mut bytes[OBJ_OFFSET..], record.quad.object.0);
        put_u32_be(&mut bytes[CONTEXT_OFFSET..], record.quad.context.0);
        if record.explicit {
            bytes[FLAG_OFFSET] = EXPLICIT_FLAG;
        }
        Self(bytes)
    }

    /// Rebuilds a record from identifier bytes and a flag byte.
    pub fn from_parts(ids: &[u8; KEY_LEN], flags: u8) -> Self {
        let mut bytes = [0u8; RECORD_LEN];
        bytes[..KEY_LEN].copy_from_slice(ids);
        bytes[FLAG_OFFSET] = flags;
        Self(bytes)
    }

    /// Decodes into a [`QuadRecord`].
    pub fn decode(&self) -> QuadRecord {
        QuadRecord {
            quad: Quad {
                subject: self.id(Field::Subject),
                predicate: self.id(Field::Predicate),
                object: self.id(Field::Object),
                context: self.id(Field::Context),
            },
            explicit: self.is_explicit(),
        }
    }

    /// Identifier stored in `field`.
    pub fn id(&self, field: Field) -> ValueId {
        ValueId(get_u32_be(&self.0[field_offset(field)..]))
    }

    /// Raw flag byte.
    pub fn flags(&self) -> u8 {
        self.0[FLAG_OFFSET]
    }

    /// Whether the explicit bit is set.
    pub fn is_explicit(&self) -> bool {
        self.flags() & EXPLICIT_FLAG != 0
    }

    /// The sixteen identifier bytes.
    pub fn ids(&self) -> [u8; KEY_LEN] {
        let mut ids = [0u8; KEY_LEN];
        ids.copy_from_slice(&self.0[..KEY_LEN]);
        ids
    }
}

/// Search key, mask and range bounds derived from a [`QuadPattern`].
///
/// Bound fields are copied into the key and both bounds, and fully masked.
/// Wildcards are zero in the key and mask, `0x00000000` in the lower bound
/// and `0xFFFFFFFF` in the upper bound.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct SearchBounds {
    /// Record with bound fields set and wildcards zeroed.
    pub key: [u8; RECORD_LEN],
    /// `0xFF` over every bound byte.
    pub mask: [u8; RECORD_LEN],
    /// Smallest record that can match.
    pub min: [u8; RECORD_LEN],
    /// Largest record that can match.
    pub max: [u8; RECORD_LEN],
}

impl SearchBounds {
    /// Derives search bounds for `pattern`.
    ///
    /// An explicit-flag constraint masks bit 0 of the flag byte; otherwise
    /// the flag byte is left unmasked.
    pub fn new(pattern: &QuadPattern) -> Self {
        let mut key = [0u8; RECORD_LEN];
        let mut mask = [0u8; RECORD_LEN];
        let mut min = [0u8; RECORD_LEN];
        let mut max = [0u8; RECORD_LEN];
        for field in Field::ALL {
            let off = field_offset(field);
            match pattern.get(field) {
                Some(id) => {
                    put_u32_be(&mut key[off..], id.0);
                    put_u32_be(&mut mask[off..], u32::MAX);
                    put_u32_be(&mut min[off..], id.0);
                    put_u32_be(&mut max[off..], id.0);
                }
                None => put_u32_be(&mut max[off..], u32::MAX),
            }
        }
        max[FLAG_OFFSET] = 0xff;
        if let Some(explicit) = pattern.explicit {
            mask[FLAG_OFFSET] = EXPLICIT_FLAG;
            if explicit {
                key[FLAG_OFFSET] = EXPLICIT_FLAG;
            }
        }
        Self {
            key,
            mask,
            min,
            max,
        }
    }

    /// True if `(record & mask) == (key & mask)`.
    pub fn matches(&self, record: &RecordBytes) -> bool {
        record
            .0
            .iter()
            .zip(self.key.iter())
            .zip(self.mask.iter())
            .all(|((r, k), m)| r & m == k & m)
    }

    /// True if every identifier byte is bound.
    pub fn is_exact(&self) -> bool {
        self.mask[..KEY_LEN].iter().all(|b| *b == 0xff)
    }
}
