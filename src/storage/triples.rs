//! Multi-index coordinator for the disk engine.
//!
//! Owns one [`QuadIndex`] per configured permutation and keeps them holding
//! the same records. Index 0 is the first declared permutation and decides
//! whether an insert changed anything.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::index::{format_index_spec, parse_index_spec, select_index, FieldOrder, IndexBatch, QuadIndex};
use super::properties::{TripleProperties, SCHEMA_VERSION};
use super::record::{RecordBytes, SearchBounds, KEY_LEN};
use crate::primitives::io::list_files;
use crate::types::{QuadPattern, QuadRecord, QuadStoreError, Result, ValueId};

/// How a pattern query will be answered.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueryPlan {
    /// Position of the chosen permutation.
    pub index: usize,
    /// Its pattern score.
    pub score: usize,
    /// True for a range scan, false for a full sequential scan.
    pub ranged: bool,
}

/// The set of index permutations of a disk store.
#[derive(Debug)]
pub struct TripleStore {
    dir: PathBuf,
    indexes: Vec<QuadIndex>,
    force_sync: bool,
}

impl TripleStore {
    /// Opens the permutations named by `index_spec` in `dir`.
    ///
    /// The configured set is compared with the one recorded in
    /// `triples.prop`; added permutations are built by copying the first
    /// previously existing one and removed permutations are deleted.
    pub fn open(dir: &Path, index_spec: &str, force_sync: bool) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let requested = parse_index_spec(index_spec)?;
        let props = TripleProperties::load(dir)?;
        match props.version {
            Some(version) if version != SCHEMA_VERSION => {
                return Err(QuadStoreError::IncompatibleSchema { found: version });
            }
            Some(_) => {}
            None => {
                if !list_files(dir, "triples-", ".dat")?.is_empty() {
                    warn!(dir = %dir.display(), "triples.missing_version");
                }
            }
        }
        let current = match props.triple_indexes.as_deref() {
            Some(spec) => parse_index_spec(spec)?,
            None => requested.clone(),
        };
        let requested_set: HashSet<_> = requested.iter().copied().collect();
        let current_set: HashSet<_> = current.iter().copied().collect();
        if requested_set != current_set {
            reindex(dir, &current, &requested, force_sync)?;
        }

        let indexes = requested
            .iter()
            .map(|order| QuadIndex::open(dir, *order))
            .collect::<Result<Vec<_>>>()?;

        let spec = format_index_spec(&requested);
        if props.version != Some(SCHEMA_VERSION) || props.triple_indexes.as_deref() != Some(spec.as_str()) {
            TripleProperties {
                version: Some(SCHEMA_VERSION),
                triple_indexes: Some(spec.clone()),
            }
            .store(dir, force_sync)?;
        }
        info!(dir = %dir.display(), indexes = %spec, records = indexes[0].len(), "triples.open");
        Ok(Self {
            dir: dir.to_path_buf(),
            indexes,
            force_sync,
        })
    }

    /// Directory holding the index files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Permutations in declaration order.
    pub fn orders(&self) -> Vec<FieldOrder> {
        self.indexes.iter().map(QuadIndex::order).collect()
    }

    /// Canonical index specification, e.g. `"spoc,posc"`.
    pub fn index_spec(&self) -> String {
        format_index_spec(&self.orders())
    }

    /// Chooses the permutation that answers `pattern`.
    pub fn plan(&self, pattern: &QuadPattern) -> QueryPlan {
        let (index, score) = select_index(&self.orders(), pattern).unwrap_or((0, 0));
        QueryPlan {
            index,
            score,
            ranged: score > 0,
        }
    }

    /// One bounded step of the scan described by `plan`.
    pub fn scan_batch(
        &self,
        plan: &QueryPlan,
        bounds: &SearchBounds,
        after: Option<&[u8; KEY_LEN]>,
        limit: usize,
    ) -> IndexBatch {
        self.indexes[plan.index].scan_batch(bounds, plan.ranged, after, limit)
    }

    /// Every record matching `pattern`, materialised.
    pub fn query(&self, pattern: &QuadPattern) -> Vec<QuadRecord> {
        let plan = self.plan(pattern);
        collect_matches(&self.indexes[plan.index], &SearchBounds::new(pattern), plan.ranged)
            .iter()
            .map(RecordBytes::decode)
            .collect()
    }

    /// Number of records matching `pattern`.
    pub fn count(&self, pattern: &QuadPattern) -> usize {
        let plan = self.plan(pattern);
        collect_matches(&self.indexes[plan.index], &SearchBounds::new(pattern), plan.ranged).len()
    }

    /// Total number of stored records.
    pub fn size(&self) -> usize {
        self.indexes[0].len()
    }

    /// Distinct non-null contexts, ascending.
    pub fn contexts(&self) -> Vec<ValueId> {
        let contexts: BTreeSet<ValueId> = self.indexes[0]
            .iter()
            .map(|record| record.decode().quad.context)
            .filter(|c| !c.is_null())
            .collect();
        contexts.into_iter().collect()
    }

    /// Stores `record` and returns the record previously stored under the
    /// same identifiers.
    ///
    /// Secondary permutations are only touched when index 0 reports that
    /// the record is new or its flags changed.
    pub fn insert(&mut self, record: QuadRecord) -> Option<QuadRecord> {
        let bytes = RecordBytes::encode(&record);
        let (first, rest) = self.indexes.split_first_mut()?;
        let previous = first.insert(bytes);
        if previous != Some(bytes) {
            for index in rest {
                index.insert(bytes);
            }
        }
        previous.map(|r| r.decode())
    }

    /// Stores `record` in every permutation unconditionally. Used when
    /// replaying a committed log whose effects may have reached only some
    /// index files.
    pub fn redo_insert(&mut self, record: QuadRecord) {
        let bytes = RecordBytes::encode(&record);
        for index in &mut self.indexes {
            index.insert(bytes);
        }
    }

    /// Removes every record matching `pattern` from every permutation and
    /// returns how many were removed.
    ///
    /// The match set is collected in full before anything is deleted.
    pub fn remove(&mut self, pattern: &QuadPattern) -> usize {
        let plan = self.plan(pattern);
        let doomed = collect_matches(&self.indexes[plan.index], &SearchBounds::new(pattern), plan.ranged);
        for index in &mut self.indexes {
            for record in &doomed {
                index.remove(record);
            }
        }
        doomed.len()
    }

    /// Removes matches of `pattern` from each permutation using that
    /// permutation's own contents.
    pub fn redo_remove(&mut self, pattern: &QuadPattern) -> usize {
        let bounds = SearchBounds::new(pattern);
        let mut removed = 0;
        for index in &mut self.indexes {
            let ranged = index.order().pattern_score(pattern) > 0;
            let doomed = collect_matches(index, &bounds, ranged);
            for record in &doomed {
                index.remove(record);
            }
            removed = removed.max(doomed.len());
        }
        removed
    }

    /// Empties every permutation, returning how many records were held.
    pub fn clear(&mut self) -> usize {
        let size = self.size();
        for index in &mut self.indexes {
            index.clear();
        }
        size
    }

    /// True if some permutation has unsynced changes.
    pub fn is_dirty(&self) -> bool {
        self.indexes.iter().any(QuadIndex::is_dirty)
    }

    /// Writes every changed permutation to disk.
    pub fn sync(&mut self) -> Result<()> {
        for index in &mut self.indexes {
            index.sync(self.force_sync)?;
        }
        Ok(())
    }

    /// Forces every permutation to be rewritten on the next sync.
    pub fn mark_all_dirty(&mut self) {
        for index in &mut self.indexes {
            index.mark_dirty();
        }
    }

    /// Checks that every permutation holds the same records.
    pub fn verify(&self) -> Result<()> {
        let reference: HashSet<RecordBytes> = self.indexes[0].iter().collect();
        for index in &self.indexes[1..] {
            if index.len() != reference.len() || !index.iter().all(|r| reference.contains(&r)) {
                return Err(QuadStoreError::Corruption("index permutations disagree"));
            }
        }
        Ok(())
    }
}

fn collect_matches(index: &QuadIndex, bounds: &SearchBounds, ranged: bool) -> Vec<RecordBytes> {
    index.scan_batch(bounds, ranged, None, usize::MAX).records
}

fn reindex(dir: &Path, current: &[FieldOrder], requested: &[FieldOrder], durable: bool) -> Result<()> {
    let added: Vec<_> = requested.iter().filter(|o| !current.contains(o)).copied().collect();
    let removed: Vec<_> = current.iter().filter(|o| !requested.contains(o)).copied().collect();
    debug!(
        added = %format_index_spec(&added),
        removed = %format_index_spec(&removed),
        "triples.reindex"
    );

    if !added.is_empty() {
        let source = QuadIndex::open(dir, current[0])?;
        for order in &added {
            let path = dir.join(QuadIndex::file_name(order));
            if path.exists() {
                fs::remove_file(&path)?;
            }
            let mut target = QuadIndex::open(dir, *order)?;
            for record in source.iter() {
                target.insert(record);
            }
            target.mark_dirty();
            target.sync(durable)?;
            info!(index = %order, records = target.len(), "triples.reindex.add");
        }
    }

    for order in removed {
        let index = QuadIndex::open(dir, order)?;
        index.delete_file()?;
        info!(index = %order, "triples.reindex.drop");
    }
    Ok(())
}
