//! The `triples.prop` metadata file: schema version and index set.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::primitives::io::{read_optional, write_atomic};
use crate::types::{QuadStoreError, Result};

/// Name of the metadata file inside a disk store directory.
pub const PROPERTIES_FILE: &str = "triples.prop";

/// Schema version written by this crate.
pub const SCHEMA_VERSION: u32 = 10;

/// Contents of `triples.prop`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripleProperties {
    /// Schema version of the stored records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    /// Comma-separated permutation names, in declaration order.
    #[serde(
        rename = "triple-indexes",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub triple_indexes: Option<String>,
}

impl TripleProperties {
    /// Path of the metadata file inside `dir`.
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(PROPERTIES_FILE)
    }

    /// Reads the metadata file, returning defaults when it is absent.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = Self::path(dir);
        let Some(bytes) = read_optional(&path)? else {
            return Ok(Self::default());
        };
        let text = String::from_utf8(bytes)
            .map_err(|_| QuadStoreError::Config(format!("{} is not UTF-8", path.display())))?;
        toml::from_str(&text)
            .map_err(|err| QuadStoreError::Config(format!("{}: {err}", path.display())))
    }

    /// Replaces the metadata file.
    pub fn store(&self, dir: &Path, durable: bool) -> Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|err| QuadStoreError::Config(err.to_string()))?;
        write_atomic(&Self::path(dir), durable, |out| {
            out.write_all(text.as_bytes())?;
            Ok(())
        })
    }
}
