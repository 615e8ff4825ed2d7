//! Term registry with per-term adjacency lists.

use rustc_hash::FxHashMap;

use super::statement::StatementId;
use crate::model::Term;
use crate::types::{Field, QuadStoreError, Result};

/// Handle of a registered term.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermId(pub u32);

#[derive(Debug)]
struct TermEntry {
    term: Term,
    // Indexed by `Field::ordinal`; `None` once a list empties.
    lists: [Option<Vec<StatementId>>; 4],
}

impl TermEntry {
    fn is_unreferenced(&self) -> bool {
        self.lists.iter().all(Option::is_none)
    }
}

/// Interns terms and records, per term and role, the statements using it.
#[derive(Debug, Default)]
pub struct TermRegistry {
    ids: FxHashMap<Term, TermId>,
    entries: Vec<Option<TermEntry>>,
    free: Vec<u32>,
}

impl TermRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered terms.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True if no term is registered.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Handle of `term`, registering it if needed.
    pub fn intern(&mut self, term: &Term) -> Result<TermId> {
        if let Some(id) = self.ids.get(term) {
            return Ok(*id);
        }
        let entry = TermEntry {
            term: term.clone(),
            lists: [None, None, None, None],
        };
        let id = match self.free.pop() {
            Some(slot) => {
                self.entries[slot as usize] = Some(entry);
                TermId(slot)
            }
            None => {
                let slot = u32::try_from(self.entries.len())
                    .map_err(|_| QuadStoreError::Invalid("term registry exhausted"))?;
                self.entries.push(Some(entry));
                TermId(slot)
            }
        };
        self.ids.insert(term.clone(), id);
        Ok(id)
    }

    /// Handle of `term` if registered.
    pub fn get_id(&self, term: &Term) -> Option<TermId> {
        self.ids.get(term).copied()
    }

    /// Term behind `id`.
    pub fn term(&self, id: TermId) -> Option<&Term> {
        self.entry(id).map(|entry| &entry.term)
    }

    fn entry(&self, id: TermId) -> Option<&TermEntry> {
        self.entries.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Statements in which `id` occurs as `field`.
    pub fn list(&self, id: TermId, field: Field) -> &[StatementId] {
        self.entry(id)
            .and_then(|entry| entry.lists[field.ordinal()].as_deref())
            .unwrap_or(&[])
    }

    /// Records that `statement` uses `id` as `field`.
    pub fn link(&mut self, id: TermId, field: Field, statement: StatementId) {
        if let Some(Some(entry)) = self.entries.get_mut(id.0 as usize) {
            entry.lists[field.ordinal()]
                .get_or_insert_with(Vec::new)
                .push(statement);
        }
    }

    /// Removes `statement` from the `field` list of `id`, releasing the
    /// list when it empties.
    pub fn unlink(&mut self, id: TermId, field: Field, statement: StatementId) {
        let Some(Some(entry)) = self.entries.get_mut(id.0 as usize) else {
            return;
        };
        let slot = &mut entry.lists[field.ordinal()];
        if let Some(list) = slot {
            if let Some(pos) = list.iter().position(|s| *s == statement) {
                list.swap_remove(pos);
            }
            if list.is_empty() {
                *slot = None;
            }
        }
    }

    /// Releases terms no statement refers to. Returns how many were released.
    pub fn collect_garbage(&mut self) -> usize {
        let mut released = 0;
        for (slot, entry) in self.entries.iter_mut().enumerate() {
            if entry.as_ref().is_some_and(TermEntry::is_unreferenced) {
                if let Some(entry) = entry.take() {
                    self.ids.remove(&entry.term);
                    // Slots index a Vec that never exceeds u32::MAX entries.
                    self.free.push(slot as u32);
                    released += 1;
                }
            }
        }
        released
    }

    /// Forgets every term.
    pub fn clear(&mut self) {
        self.ids.clear();
        self.entries.clear();
        self.free.clear();
    }
}
