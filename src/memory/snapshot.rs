//! Snapshot file of a memory store.
//!
//! Layout: magic `BMSF`, a version byte, then a gzip stream of tagged
//! records closed by an end marker. Terms use the encoding of
//! [`Term::encode`]. Version 2 strings carry four-byte length prefixes;
//! version 1 files, with two-byte prefixes, are still read.

use std::io::{Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{info, warn};

use super::statement::Statement;
use crate::model::{Namespace, Term};
use crate::primitives::bytes::stream::{read_str, read_u8, read_u8_opt, write_str, write_u8, StrWidth};
use crate::primitives::io::{read_optional, write_atomic};
use crate::types::{QuadStoreError, Result};

/// Leading bytes of every snapshot file.
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"BMSF";
/// Format version written by this crate.
pub const SNAPSHOT_VERSION: u8 = 2;

const NAMESPACE_MARKER: u8 = 1;
const EXPL_TRIPLE_MARKER: u8 = 2;
const EXPL_QUAD_MARKER: u8 = 3;
const INF_TRIPLE_MARKER: u8 = 4;
const INF_QUAD_MARKER: u8 = 5;
const EOF_MARKER: u8 = 127;

/// Decoded snapshot contents.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Namespace bindings.
    pub namespaces: Vec<Namespace>,
    /// Committed statements.
    pub statements: Vec<Statement>,
}

impl Snapshot {
    /// Number of explicit statements.
    pub fn explicit_count(&self) -> usize {
        self.statements.iter().filter(|st| st.explicit).count()
    }

    /// Number of inferred statements.
    pub fn inferred_count(&self) -> usize {
        self.statements.len() - self.explicit_count()
    }
}

/// Writes `namespaces` and `statements` to `path`, replacing it atomically.
pub fn save<'a>(
    path: &Path,
    durable: bool,
    namespaces: &[Namespace],
    statements: impl IntoIterator<Item = &'a Statement>,
) -> Result<usize> {
    save_as(path, durable, SNAPSHOT_VERSION, namespaces, statements)
}

fn save_as<'a>(
    path: &Path,
    durable: bool,
    version: u8,
    namespaces: &[Namespace],
    statements: impl IntoIterator<Item = &'a Statement>,
) -> Result<usize> {
    let width = string_width(version)?;
    let mut written = 0;
    write_atomic(path, durable, |out| {
        out.write_all(SNAPSHOT_MAGIC)?;
        write_u8(out, version)?;
        let mut gz = GzEncoder::new(out, Compression::default());
        for ns in namespaces {
            write_u8(&mut gz, NAMESPACE_MARKER)?;
            write_str(&mut gz, &ns.prefix, width)?;
            write_str(&mut gz, &ns.name, width)?;
            write_u8(&mut gz, 1)?;
        }
        for st in statements {
            let marker = match (st.explicit, st.context.is_some()) {
                (true, false) => EXPL_TRIPLE_MARKER,
                (true, true) => EXPL_QUAD_MARKER,
                (false, false) => INF_TRIPLE_MARKER,
                (false, true) => INF_QUAD_MARKER,
            };
            write_u8(&mut gz, marker)?;
            st.subject.encode(&mut gz, width)?;
            st.predicate.encode(&mut gz, width)?;
            st.object.encode(&mut gz, width)?;
            if let Some(context) = &st.context {
                context.encode(&mut gz, width)?;
            }
            written += 1;
        }
        write_u8(&mut gz, EOF_MARKER)?;
        gz.finish()?;
        Ok(())
    })?;
    info!(path = %path.display(), namespaces = namespaces.len(), statements = written, "snapshot.save");
    Ok(written)
}

/// Reads the snapshot at `path`.
///
/// A missing or empty file yields an empty snapshot; the latter is logged.
pub fn load(path: &Path) -> Result<Snapshot> {
    let Some(bytes) = read_optional(path)? else {
        return Ok(Snapshot::default());
    };
    if bytes.is_empty() {
        warn!(path = %path.display(), "snapshot.empty_file");
        return Ok(Snapshot::default());
    }
    let snapshot = decode(&bytes)?;
    info!(
        path = %path.display(),
        namespaces = snapshot.namespaces.len(),
        statements = snapshot.statements.len(),
        "snapshot.load"
    );
    Ok(snapshot)
}

fn string_width(version: u8) -> Result<StrWidth> {
    match version {
        1 => Ok(StrWidth::Short),
        SNAPSHOT_VERSION => Ok(StrWidth::Long),
        _ => Err(QuadStoreError::Corruption("unsupported snapshot version")),
    }
}

fn decode(bytes: &[u8]) -> Result<Snapshot> {
    let mut src = bytes;
    let mut magic = [0u8; 4];
    src.read_exact(&mut magic)?;
    if &magic != SNAPSHOT_MAGIC {
        return Err(QuadStoreError::Corruption("snapshot missing magic header"));
    }
    let width = string_width(read_u8(&mut src)?)?;
    let mut gz = GzDecoder::new(src);
    let mut snapshot = Snapshot::default();
    loop {
        let marker = read_u8_opt(&mut gz)?
            .ok_or(QuadStoreError::Corruption("snapshot ends without end marker"))?;
        match marker {
            EOF_MARKER => break,
            NAMESPACE_MARKER => {
                let prefix = read_str(&mut gz, width)?;
                let name = read_str(&mut gz, width)?;
                let _exported = read_u8(&mut gz)?;
                snapshot.namespaces.push(Namespace::new(prefix, name));
            }
            EXPL_TRIPLE_MARKER | EXPL_QUAD_MARKER | INF_TRIPLE_MARKER | INF_QUAD_MARKER => {
                let subject = Term::decode(&mut gz, width)?;
                let predicate = Term::decode(&mut gz, width)?;
                let object = Term::decode(&mut gz, width)?;
                let context = match marker {
                    EXPL_QUAD_MARKER | INF_QUAD_MARKER => Some(Term::decode(&mut gz, width)?),
                    _ => None,
                };
                snapshot.statements.push(Statement {
                    subject,
                    predicate,
                    object,
                    context,
                    explicit: matches!(marker, EXPL_TRIPLE_MARKER | EXPL_QUAD_MARKER),
                });
            }
            _ => return Err(QuadStoreError::Corruption("unknown snapshot record marker")),
        }
    }
    Ok(snapshot)
}
