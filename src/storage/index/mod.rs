//! Index permutations: field orders, pattern scoring and the sorted
//! record collections that back them.

use std::fmt;
use std::str::FromStr;

use crate::storage::record::{field_offset, RecordBytes, KEY_LEN, RECORD_LEN};
use crate::types::{Field, QuadPattern, QuadStoreError, Result};

mod btree;

pub use btree::{IndexBatch, QuadIndex, INDEX_MAGIC, INDEX_VERSION};

/// Index specification used when none is configured.
pub const DEFAULT_INDEX_SPEC: &str = "spoc,posc";

/// Sort order of an index permutation, e.g. `spoc`.
///
/// Holds each field exactly once. The order is resolved when the
/// permutation is created so comparisons never re-read the name.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct FieldOrder([Field; 4]);

impl FieldOrder {
    /// Subject-predicate-object-context.
    pub const SPOC: FieldOrder = FieldOrder(Field::ALL);

    /// Validates a four-letter permutation name.
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = |reason| QuadStoreError::InvalidIndexSpec {
            spec: spec.to_string(),
            reason,
        };
        let lowered = spec.trim().to_ascii_lowercase();
        if lowered.chars().count() != 4 {
            return Err(invalid("expected exactly four field letters"));
        }
        let mut fields = [Field::Subject; 4];
        let mut seen = [false; 4];
        for (slot, c) in fields.iter_mut().zip(lowered.chars()) {
            let field = Field::from_char(c).ok_or_else(|| invalid("unknown field letter"))?;
            if std::mem::replace(&mut seen[field.ordinal()], true) {
                return Err(invalid("field letter repeated"));
            }
            *slot = field;
        }
        Ok(Self(fields))
    }

    /// Fields in sort order.
    pub fn fields(&self) -> [Field; 4] {
        self.0
    }

    /// Permutation name, e.g. `"posc"`.
    pub fn name(&self) -> String {
        self.0.iter().map(|f| f.as_char()).collect()
    }

    /// Number of leading fields of this order that `pattern` binds.
    ///
    /// Counting stops at the first wildcard, so a bound field that follows
    /// an unbound one never contributes.
    pub fn pattern_score(&self, pattern: &QuadPattern) -> usize {
        self.0
            .iter()
            .take_while(|field| pattern.get(**field).is_some())
            .count()
    }

    /// Rearranges the identifier bytes of `record` into this order so plain
    /// byte comparison follows the permutation.
    pub fn sort_key(&self, record: &[u8; RECORD_LEN]) -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        for (slot, field) in self.0.iter().enumerate() {
            let src = field_offset(*field);
            key[slot * 4..slot * 4 + 4].copy_from_slice(&record[src..src + 4]);
        }
        key
    }

    /// Inverse of [`FieldOrder::sort_key`], yielding a full record.
    pub fn record_from_key(&self, key: &[u8; KEY_LEN], flags: u8) -> RecordBytes {
        let mut ids = [0u8; KEY_LEN];
        for (slot, field) in self.0.iter().enumerate() {
            let dst = field_offset(*field);
            ids[dst..dst + 4].copy_from_slice(&key[slot * 4..slot * 4 + 4]);
        }
        RecordBytes::from_parts(&ids, flags)
    }
}

impl fmt::Display for FieldOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for field in self.0 {
            write!(f, "{}", field.as_char())?;
        }
        Ok(())
    }
}

impl FromStr for FieldOrder {
    type Err = QuadStoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Parses a list of permutations separated by commas or whitespace.
///
/// Names are lowercased; duplicates are dropped keeping the first
/// occurrence. An empty list yields [`DEFAULT_INDEX_SPEC`].
pub fn parse_index_spec(spec: &str) -> Result<Vec<FieldOrder>> {
    let mut orders: Vec<FieldOrder> = Vec::new();
    for token in spec
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        let order = FieldOrder::parse(token)?;
        if !orders.contains(&order) {
            orders.push(order);
        }
    }
    if orders.is_empty() {
        return parse_index_spec(DEFAULT_INDEX_SPEC);
    }
    Ok(orders)
}

/// Canonical comma-separated form of a permutation list.
pub fn format_index_spec(orders: &[FieldOrder]) -> String {
    orders
        .iter()
        .map(FieldOrder::name)
        .collect::<Vec<_>>()
        .join(",")
}

/// Picks the permutation with the highest pattern score.
///
/// Ties go to the earliest permutation. Returns the position and score.
pub fn select_index(orders: &[FieldOrder], pattern: &QuadPattern) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    for (pos, order) in orders.iter().enumerate() {
        let score = order.pattern_score(pattern);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((pos, score));
        }
    }
    best
}
