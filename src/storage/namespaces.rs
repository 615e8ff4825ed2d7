//! Namespace prefix bookkeeping used by the write-intent log replay.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::model::Namespace;
use crate::primitives::io::{read_optional, write_atomic};
use crate::types::{QuadStoreError, Result};

/// Name of the namespace file inside a disk store directory.
pub const NAMESPACES_FILE: &str = "namespaces.toml";

/// Prefix-to-namespace mapping consulted by the query layer.
pub trait NamespaceStore: Send + Sync {
    /// Namespace bound to `prefix`.
    fn get_namespace(&self, prefix: &str) -> Option<&str>;
    /// Binds `prefix`, replacing any previous binding.
    fn set_namespace(&mut self, prefix: &str, name: &str);
    /// Unbinds `prefix`.
    fn remove_namespace(&mut self, prefix: &str);
    /// All bindings ordered by prefix.
    fn namespaces(&self) -> Vec<Namespace>;
    /// Removes every binding.
    fn clear(&mut self);
    /// Persists pending changes.
    fn sync(&mut self) -> Result<()>;
}

/// Namespace table kept in memory and optionally mirrored to
/// `namespaces.toml`.
#[derive(Debug, Default)]
pub struct NamespaceTable {
    path: Option<PathBuf>,
    durable: bool,
    entries: BTreeMap<String, String>,
    dirty: bool,
}

impl NamespaceTable {
    /// Table that never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the table from `dir`, starting empty if no file exists.
    pub fn open(dir: &Path, durable: bool) -> Result<Self> {
        let path = dir.join(NAMESPACES_FILE);
        let entries = match read_optional(&path)? {
            Some(bytes) => {
                let text = String::from_utf8(bytes).map_err(|_| {
                    QuadStoreError::Config(format!("{} is not UTF-8", path.display()))
                })?;
                toml::from_str(&text)
                    .map_err(|err| QuadStoreError::Config(format!("{}: {err}", path.display())))?
            }
            None => BTreeMap::new(),
        };
        Ok(Self {
            path: Some(path),
            durable,
            entries,
            dirty: false,
        })
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl NamespaceStore for NamespaceTable {
    fn get_namespace(&self, prefix: &str) -> Option<&str> {
        self.entries.get(prefix).map(String::as_str)
    }

    fn set_namespace(&mut self, prefix: &str, name: &str) {
        if self.entries.get(prefix).map(String::as_str) != Some(name) {
            self.entries.insert(prefix.to_string(), name.to_string());
            self.dirty = true;
        }
    }

    fn remove_namespace(&mut self, prefix: &str) {
        if self.entries.remove(prefix).is_some() {
            self.dirty = true;
        }
    }

    fn namespaces(&self) -> Vec<Namespace> {
        self.entries
            .iter()
            .map(|(prefix, name)| Namespace::new(prefix.clone(), name.clone()))
            .collect()
    }

    fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.dirty = true;
        }
    }

    fn sync(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        let text = toml::to_string(&self.entries)
            .map_err(|err| QuadStoreError::Config(err.to_string()))?;
        write_atomic(path, self.durable, |out| {
            out.write_all(text.as_bytes())?;
            Ok(())
        })?;
        self.dirty = false;
        debug!(namespaces = self.entries.len(), "namespaces.sync");
        Ok(())
    }
}
