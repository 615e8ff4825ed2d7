//! Statement table and per-statement transaction status.

use rustc_hash::FxHashMap;

use super::values::TermId;
use crate::model::Term;
use crate::types::{QuadStoreError, Result};

/// Pending effect of the open transaction on one statement.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum TxnStatus {
    /// No pending change; `explicit` is the committed value.
    #[default]
    Neutral,
    /// Added by the open transaction.
    New,
    /// Committed as inferred, pending upgrade to explicit.
    Explicit,
    /// Committed as explicit, pending downgrade to inferred.
    Inferred,
    /// Committed, pending removal.
    Deprecated,
    /// Added and then removed by the open transaction.
    Zombie,
}

/// Which transaction statuses a query observes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReadMode {
    /// State as of the last commit.
    Committed,
    /// State including the open transaction's changes.
    Transaction,
    /// Every stored statement regardless of status.
    Raw,
}

/// Identity of a statement slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementId(pub u32);

/// Term handles of a statement; `context` is `None` for the default graph.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StatementKey {
    /// Subject handle.
    pub subject: TermId,
    /// Predicate handle.
    pub predicate: TermId,
    /// Object handle.
    pub object: TermId,
    /// Context handle.
    pub context: Option<TermId>,
}

/// A stored statement.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemStatement {
    /// Term handles.
    pub key: StatementKey,
    /// Committed explicit flag, or the pending one while `New`.
    pub explicit: bool,
    /// Pending transaction effect.
    pub status: TxnStatus,
}

impl MemStatement {
    /// Whether a reader in `mode` sees this statement. With `explicit_only`
    /// inferred statements are hidden.
    pub fn is_visible(&self, mode: ReadMode, explicit_only: bool) -> bool {
        match mode {
            ReadMode::Committed => {
                !matches!(self.status, TxnStatus::New | TxnStatus::Zombie)
                    && (!explicit_only || self.explicit)
            }
            ReadMode::Transaction => {
                if matches!(self.status, TxnStatus::Deprecated | TxnStatus::Zombie) {
                    return false;
                }
                !explicit_only
                    || (self.status != TxnStatus::Inferred
                        && (self.explicit || self.status == TxnStatus::Explicit))
            }
            ReadMode::Raw => !explicit_only || self.explicit,
        }
    }

    /// Applies an add of the same statement. Returns true if it becomes
    /// present, or explicit, in the transaction view.
    pub fn apply_add(&mut self, explicit: bool) -> bool {
        match self.status {
            TxnStatus::Neutral if explicit && !self.explicit => {
                self.status = TxnStatus::Explicit;
                true
            }
            TxnStatus::New if explicit && !self.explicit => {
                self.explicit = true;
                true
            }
            TxnStatus::Deprecated => {
                self.status = if self.explicit == explicit {
                    TxnStatus::Neutral
                } else if explicit {
                    TxnStatus::Explicit
                } else {
                    TxnStatus::Inferred
                };
                true
            }
            TxnStatus::Inferred if explicit && self.explicit => {
                self.status = TxnStatus::Neutral;
                true
            }
            TxnStatus::Zombie => {
                self.status = TxnStatus::New;
                self.explicit = explicit;
                true
            }
            _ => false,
        }
    }

    /// Applies a remove with the given explicitness. Returns true if the
    /// statement disappears from the transaction view.
    pub fn apply_remove(&mut self, explicit: bool) -> bool {
        match self.status {
            TxnStatus::Neutral if self.explicit == explicit => {
                self.status = TxnStatus::Deprecated;
                true
            }
            TxnStatus::New if self.explicit == explicit => {
                self.status = TxnStatus::Zombie;
                true
            }
            TxnStatus::Explicit if explicit && !self.explicit => {
                self.status = TxnStatus::Neutral;
                false
            }
            TxnStatus::Inferred if !explicit && self.explicit => {
                self.status = TxnStatus::Deprecated;
                true
            }
            _ => false,
        }
    }
}

/// A statement resolved to terms.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Statement {
    /// Subject term.
    pub subject: Term,
    /// Predicate term.
    pub predicate: Term,
    /// Object term.
    pub object: Term,
    /// Context term, `None` for the default graph.
    pub context: Option<Term>,
    /// Whether the statement was asserted rather than inferred.
    pub explicit: bool,
}

/// Slab of statements with exact-key lookup.
#[derive(Debug, Default)]
pub struct StatementTable {
    slots: Vec<Option<MemStatement>>,
    free: Vec<u32>,
    lookup: FxHashMap<StatementKey, StatementId>,
}

impl StatementTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored statements, whatever their status.
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    /// True if the table holds nothing.
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Highest slot index plus one.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slot holding `key`.
    pub fn find(&self, key: &StatementKey) -> Option<StatementId> {
        self.lookup.get(key).copied()
    }

    /// Statement in slot `id`.
    pub fn get(&self, id: StatementId) -> Option<&MemStatement> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Mutable statement in slot `id`.
    pub fn get_mut(&mut self, id: StatementId) -> Option<&mut MemStatement> {
        self.slots.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Stores `statement`, which must not already be present.
    pub fn insert(&mut self, statement: MemStatement) -> Result<StatementId> {
        let id = match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(statement);
                StatementId(slot)
            }
            None => {
                let slot = u32::try_from(self.slots.len())
                    .map_err(|_| QuadStoreError::Invalid("statement table exhausted"))?;
                self.slots.push(Some(statement));
                StatementId(slot)
            }
        };
        self.lookup.insert(statement.key, id);
        Ok(id)
    }

    /// Removes and returns the statement in slot `id`.
    pub fn remove(&mut self, id: StatementId) -> Option<MemStatement> {
        let statement = self.slots.get_mut(id.0 as usize)?.take()?;
        self.lookup.remove(&statement.key);
        self.free.push(id.0);
        Some(statement)
    }

    /// Occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (StatementId, &MemStatement)> + '_ {
        self.slots.iter().enumerate().filter_map(|(slot, st)| {
            // Slot count is bounded by u32 in `insert`.
            st.as_ref().map(|st| (StatementId(slot as u32), st))
        })
    }

    /// Forgets every statement.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.lookup.clear();
    }
}
