//! Write-intent log of a disk-engine transaction.
//!
//! Mutations are appended to a private `txn-*.log` file while the
//! transaction is open. Commit seals the file with a trailer carrying the
//! record count and a CRC over everything before it, then replays it. A
//! sealed log still present at open time belongs to a commit that did not
//! finish persisting its indexes and is replayed again; an unsealed log is
//! an abandoned transaction and is discarded.
//!
//! Version 2 logs write namespace strings with four-byte length prefixes;
//! version 1 logs left behind by older builds are still replayed.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::primitives::bytes::stream::{
    read_str, read_u16, read_u32, read_u8, read_u8_opt, write_long_utf, write_u16, write_u32, write_u8,
    StrWidth,
};
use crate::primitives::io::{remove_if_exists, sync_dir};
use crate::types::{ChecksumReader, ChecksumWriter, Quad, QuadPattern, QuadStoreError, Result, ValueId};

const LOG_MAGIC: &[u8; 4] = b"QTXN";
const LOG_VERSION: u16 = 2;

const OP_ADD: u8 = 1;
const OP_REMOVE: u8 = 2;
const OP_CLEAR_CONTEXT: u8 = 5;
const OP_CLEAR: u8 = 6;
const OP_SET_NAMESPACE: u8 = 7;
const OP_REMOVE_NAMESPACE: u8 = 8;
const OP_COMMIT: u8 = 0xff;

const BOUND_SUBJECT: u8 = 1 << 0;
const BOUND_PREDICATE: u8 = 1 << 1;
const BOUND_OBJECT: u8 = 1 << 2;
const BOUND_CONTEXT: u8 = 1 << 3;
const EXPLICIT_CONSTRAINED: u8 = 1 << 4;
const EXPLICIT_VALUE: u8 = 1 << 5;

/// File name prefix of transaction logs.
pub const LOG_PREFIX: &str = "txn-";
/// File name suffix of transaction logs.
pub const LOG_SUFFIX: &str = ".log";

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);

/// One pending mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogRecord {
    /// Insert a quad with the given explicit flag.
    AddStatement {
        /// Quad to insert.
        quad: Quad,
        /// Explicit flag to store.
        explicit: bool,
    },
    /// Remove every quad matching a pattern.
    RemoveStatement {
        /// Pattern selecting the quads.
        pattern: QuadPattern,
    },
    /// Remove every quad in one context (the null context included).
    ClearContext {
        /// Context to empty.
        context: ValueId,
    },
    /// Remove every quad.
    ClearAll,
    /// Bind a namespace prefix.
    SetNamespace {
        /// Prefix to bind.
        prefix: String,
        /// Namespace IRI.
        name: String,
    },
    /// Unbind a namespace prefix.
    RemoveNamespace {
        /// Prefix to remove.
        prefix: String,
    },
}

impl LogRecord {
    fn encode<W: Write>(&self, out: &mut W) -> Result<()> {
        match self {
            LogRecord::AddStatement { quad, explicit } => {
                write_u8(out, OP_ADD)?;
                for id in [quad.subject, quad.predicate, quad.object, quad.context] {
                    write_u32(out, id.0)?;
                }
                write_u8(out, u8::from(*explicit))?;
            }
            LogRecord::RemoveStatement { pattern } => {
                write_u8(out, OP_REMOVE)?;
                let fields = [
                    (pattern.subject, BOUND_SUBJECT),
                    (pattern.predicate, BOUND_PREDICATE),
                    (pattern.object, BOUND_OBJECT),
                    (pattern.context, BOUND_CONTEXT),
                ];
                let mut bits = fields
                    .iter()
                    .filter(|(id, _)| id.is_some())
                    .fold(0u8, |acc, (_, bit)| acc | bit);
                match pattern.explicit {
                    Some(true) => bits |= EXPLICIT_CONSTRAINED | EXPLICIT_VALUE,
                    Some(false) => bits |= EXPLICIT_CONSTRAINED,
                    None => {}
                }
                write_u8(out, bits)?;
                for (id, _) in fields {
                    write_u32(out, id.map_or(0, |id| id.0))?;
                }
            }
            LogRecord::ClearContext { context } => {
                write_u8(out, OP_CLEAR_CONTEXT)?;
                write_u32(out, context.0)?;
            }
            LogRecord::ClearAll => write_u8(out, OP_CLEAR)?,
            LogRecord::SetNamespace { prefix, name } => {
                write_u8(out, OP_SET_NAMESPACE)?;
                write_long_utf(out, prefix)?;
                write_long_utf(out, name)?;
            }
            LogRecord::RemoveNamespace { prefix } => {
                write_u8(out, OP_REMOVE_NAMESPACE)?;
                write_long_utf(out, prefix)?;
            }
        }
        Ok(())
    }

    fn decode_after_tag<R: Read>(tag: u8, src: &mut R, width: StrWidth) -> Result<Self> {
        let record = match tag {
            OP_ADD => {
                let mut ids = [ValueId(0); 4];
                for id in &mut ids {
                    *id = ValueId(read_u32(src)?);
                }
                let explicit = read_u8(src)? != 0;
                LogRecord::AddStatement {
                    quad: Quad::new(ids[0], ids[1], ids[2], ids[3]),
                    explicit,
                }
            }
            OP_REMOVE => {
                let bits = read_u8(src)?;
                let mut read_field = |bit: u8| -> Result<Option<ValueId>> {
                    let raw = read_u32(src)?;
                    Ok((bits & bit != 0).then_some(ValueId(raw)))
                };
                let pattern = QuadPattern {
                    subject: read_field(BOUND_SUBJECT)?,
                    predicate: read_field(BOUND_PREDICATE)?,
                    object: read_field(BOUND_OBJECT)?,
                    context: read_field(BOUND_CONTEXT)?,
                    explicit: (bits & EXPLICIT_CONSTRAINED != 0).then_some(bits & EXPLICIT_VALUE != 0),
                };
                LogRecord::RemoveStatement { pattern }
            }
            OP_CLEAR_CONTEXT => LogRecord::ClearContext {
                context: ValueId(read_u32(src)?),
            },
            OP_CLEAR => LogRecord::ClearAll,
            OP_SET_NAMESPACE => {
                let prefix = read_str(src, width)?;
                let name = read_str(src, width)?;
                LogRecord::SetNamespace { prefix, name }
            }
            OP_REMOVE_NAMESPACE => LogRecord::RemoveNamespace {
                prefix: read_str(src, width)?,
            },
            _ => return Err(QuadStoreError::Corruption("unknown transaction log record")),
        };
        Ok(record)
    }
}

/// Appends records to a new transaction log file.
pub struct TxnLogWriter {
    path: PathBuf,
    out: ChecksumWriter<BufWriter<File>>,
    records: u32,
    scratch: Vec<u8>,
    failed: bool,
}

impl TxnLogWriter {
    /// Creates a fresh log file in `dir`.
    pub fn create(dir: &Path) -> Result<Self> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = LOG_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("{LOG_PREFIX}{nanos:020}-{seq:06}{LOG_SUFFIX}"));
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        let mut out = ChecksumWriter::new(BufWriter::new(file));
        let header = out
            .write_all(LOG_MAGIC)
            .and_then(|()| write_u16(&mut out, LOG_VERSION));
        if let Err(err) = header {
            drop(out);
            let _ = remove_if_exists(&path);
            return Err(err.into());
        }
        debug!(path = %path.display(), "txn_log.create");
        Ok(Self {
            path,
            out,
            records: 0,
            scratch: Vec::new(),
            failed: false,
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records appended so far.
    pub fn len(&self) -> u32 {
        self.records
    }

    /// True if nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Appends one record.
    ///
    /// The record is encoded in full before any byte reaches the file, so a
    /// record that cannot be encoded leaves the log as it was. A failed
    /// write leaves a partial frame behind; later appends and `seal` are
    /// then refused.
    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        self.ensure_intact()?;
        let records = self
            .records
            .checked_add(1)
            .ok_or(QuadStoreError::Invalid("too many operations in one transaction"))?;
        self.scratch.clear();
        record.encode(&mut self.scratch)?;
        if let Err(err) = self.out.write_all(&self.scratch) {
            self.failed = true;
            return Err(err.into());
        }
        self.records = records;
        Ok(())
    }

    fn ensure_intact(&self) -> Result<()> {
        if self.failed {
            return Err(QuadStoreError::Corruption("transaction log holds a partial record"));
        }
        Ok(())
    }

    /// Writes the commit trailer and flushes the file to disk.
    pub fn seal(mut self, durable: bool) -> Result<PathBuf> {
        self.ensure_intact()?;
        write_u8(&mut self.out, OP_COMMIT)?;
        write_u32(&mut self.out, self.records)?;
        let crc = self.out.crc();
        write_u32(self.out.get_mut(), crc)?;
        let mut buffered = self.out.into_inner();
        buffered.flush()?;
        let file = buffered.into_inner().map_err(|err| err.into_error())?;
        if durable {
            file.sync_all()?;
            if let Some(dir) = self.path.parent() {
                sync_dir(dir)?;
            }
        }
        debug!(records = self.records, path = %self.path.display(), "txn_log.seal");
        Ok(self.path)
    }

    /// Deletes the log without sealing it.
    pub fn discard(self) -> Result<()> {
        let path = self.path;
        drop(self.out);
        remove_if_exists(&path)?;
        debug!(path = %path.display(), "txn_log.discard");
        Ok(())
    }
}

/// Parsed contents of a log file.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LogContents {
    /// Records in issue order.
    pub records: Vec<LogRecord>,
    /// True if a valid commit trailer was found.
    pub committed: bool,
}

/// Reads a log file from the beginning.
///
/// A log that ends early, or whose trailer does not check out, is returned
/// with `committed == false`.
pub fn read_log(path: &Path) -> Result<LogContents> {
    let file = File::open(path)?;
    let mut src = ChecksumReader::new(BufReader::new(file));
    let mut contents = LogContents::default();

    let mut magic = [0u8; 4];
    match src.read_exact(&mut magic) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(contents),
        Err(err) => return Err(err.into()),
    }
    if &magic != LOG_MAGIC {
        return Err(QuadStoreError::Corruption("transaction log magic mismatch"));
    }
    let width = match read_u16(&mut src) {
        Ok(1) => StrWidth::Short,
        Ok(LOG_VERSION) => StrWidth::Long,
        Ok(_) => return Err(QuadStoreError::Corruption("unsupported transaction log version")),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(contents),
        Err(err) => return Err(err.into()),
    };

    loop {
        let tag = match read_u8_opt(&mut src)? {
            Some(tag) => tag,
            None => return Ok(contents),
        };
        if tag == OP_COMMIT {
            let count = match read_u32(&mut src) {
                Ok(count) => count,
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(contents),
                Err(err) => return Err(err.into()),
            };
            let computed = src.crc();
            let stored = match read_u32(src.get_mut()) {
                Ok(crc) => crc,
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(contents),
                Err(err) => return Err(err.into()),
            };
            let matches = usize::try_from(count).map_or(false, |n| n == contents.records.len());
            if stored == computed && matches {
                contents.committed = true;
            } else {
                warn!(path = %path.display(), "txn_log.bad_trailer");
            }
            return Ok(contents);
        }
        match LogRecord::decode_after_tag(tag, &mut src, width) {
            Ok(record) => contents.records.push(record),
            Err(QuadStoreError::Io(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                return Ok(contents);
            }
            Err(err) => return Err(err),
        }
    }
}
