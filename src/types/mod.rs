#![forbid(unsafe_code)]
//! Identifiers, quads, patterns and the crate-wide error type.

use std::fmt;

pub mod checksum;

pub use checksum::{ChecksumReader, ChecksumWriter};

/// Integer identifier of an interned RDF term.
///
/// The value `0` never names a term; in the context position it stands for
/// the default (null) context.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ValueId(pub u32);

impl ValueId {
    /// Identifier used in the context field for statements without a context.
    pub const NULL_CONTEXT: ValueId = ValueId(0);

    /// Returns true if this is the null-context sentinel.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ValueId {
    fn from(value: u32) -> Self {
        ValueId(value)
    }
}

impl From<ValueId> for u32 {
    fn from(value: ValueId) -> Self {
        value.0
    }
}

/// A subject-predicate-object-context tuple of term identifiers.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Quad {
    /// Subject identifier.
    pub subject: ValueId,
    /// Predicate identifier.
    pub predicate: ValueId,
    /// Object identifier.
    pub object: ValueId,
    /// Context identifier, [`ValueId::NULL_CONTEXT`] for the default graph.
    pub context: ValueId,
}

impl Quad {
    /// Creates a quad from raw identifiers.
    pub fn new(
        subject: impl Into<ValueId>,
        predicate: impl Into<ValueId>,
        object: impl Into<ValueId>,
        context: impl Into<ValueId>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            context: context.into(),
        }
    }

    /// Returns the identifier stored in `field`.
    pub fn get(&self, field: Field) -> ValueId {
        match field {
            Field::Subject => self.subject,
            Field::Predicate => self.predicate,
            Field::Object => self.object,
            Field::Context => self.context,
        }
    }

    /// Pattern matching exactly this quad.
    pub fn as_pattern(&self) -> QuadPattern {
        QuadPattern {
            subject: Some(self.subject),
            predicate: Some(self.predicate),
            object: Some(self.object),
            context: Some(self.context),
            explicit: None,
        }
    }
}

impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.subject, self.predicate, self.object, self.context
        )
    }
}

/// A stored quad together with its explicit/inferred flag.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct QuadRecord {
    /// The quad identifiers.
    pub quad: Quad,
    /// True for asserted statements, false for inferred ones.
    pub explicit: bool,
}

impl QuadRecord {
    /// Creates a record.
    pub fn new(quad: Quad, explicit: bool) -> Self {
        Self { quad, explicit }
    }
}

/// One of the four positions of a quad.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum Field {
    /// Subject position (`s`).
    Subject,
    /// Predicate position (`p`).
    Predicate,
    /// Object position (`o`).
    Object,
    /// Context position (`c`).
    Context,
}

impl Field {
    /// All fields in record order.
    pub const ALL: [Field; 4] = [
        Field::Subject,
        Field::Predicate,
        Field::Object,
        Field::Context,
    ];

    /// Parses a field letter (`s`, `p`, `o` or `c`).
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            's' => Some(Field::Subject),
            'p' => Some(Field::Predicate),
            'o' => Some(Field::Object),
            'c' => Some(Field::Context),
            _ => None,
        }
    }

    /// Returns the field letter.
    pub const fn as_char(self) -> char {
        match self {
            Field::Subject => 's',
            Field::Predicate => 'p',
            Field::Object => 'o',
            Field::Context => 'c',
        }
    }

    /// Position of the field inside a record (0..4).
    pub const fn ordinal(self) -> usize {
        match self {
            Field::Subject => 0,
            Field::Predicate => 1,
            Field::Object => 2,
            Field::Context => 3,
        }
    }
}

/// A quad pattern: each field is either bound to an identifier or a wildcard.
///
/// `explicit` optionally restricts matches to explicit (`Some(true)`) or
/// inferred (`Some(false)`) records.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct QuadPattern {
    /// Bound subject, or `None` for any.
    pub subject: Option<ValueId>,
    /// Bound predicate, or `None` for any.
    pub predicate: Option<ValueId>,
    /// Bound object, or `None` for any.
    pub object: Option<ValueId>,
    /// Bound context (may be the null context), or `None` for any.
    pub context: Option<ValueId>,
    /// Optional constraint on the explicit flag.
    pub explicit: Option<bool>,
}

impl QuadPattern {
    /// Pattern matching every quad.
    pub const fn any() -> Self {
        Self {
            subject: None,
            predicate: None,
            object: None,
            context: None,
            explicit: None,
        }
    }

    /// Builds a pattern from the wire convention where `-1` is a wildcard.
    pub fn from_raw(subject: i64, predicate: i64, object: i64, context: i64) -> Self {
        fn bound(raw: i64) -> Option<ValueId> {
            u32::try_from(raw).ok().map(ValueId)
        }
        Self {
            subject: bound(subject),
            predicate: bound(predicate),
            object: bound(object),
            context: bound(context),
            explicit: None,
        }
    }

    /// Sets the subject.
    pub fn subject(mut self, id: impl Into<ValueId>) -> Self {
        self.subject = Some(id.into());
        self
    }

    /// Sets the predicate.
    pub fn predicate(mut self, id: impl Into<ValueId>) -> Self {
        self.predicate = Some(id.into());
        self
    }

    /// Sets the object.
    pub fn object(mut self, id: impl Into<ValueId>) -> Self {
        self.object = Some(id.into());
        self
    }

    /// Sets the context.
    pub fn context(mut self, id: impl Into<ValueId>) -> Self {
        self.context = Some(id.into());
        self
    }

    /// Restricts the pattern to explicit or inferred records.
    pub fn with_explicit(mut self, explicit: bool) -> Self {
        self.explicit = Some(explicit);
        self
    }

    /// Returns the bound value for `field`, if any.
    pub fn get(&self, field: Field) -> Option<ValueId> {
        match field {
            Field::Subject => self.subject,
            Field::Predicate => self.predicate,
            Field::Object => self.object,
            Field::Context => self.context,
        }
    }

    /// Returns true if `record` satisfies every bound field and the
    /// explicit constraint.
    pub fn matches(&self, record: &QuadRecord) -> bool {
        Field::ALL.iter().all(|field| match self.get(*field) {
            Some(id) => record.quad.get(*field) == id,
            None => true,
        }) && self.explicit.map_or(true, |e| e == record.explicit)
    }
}

/// Errors raised by the quad store.
#[derive(thiserror::Error, Debug)]
pub enum QuadStoreError {
    /// Underlying file-system failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// On-disk data failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller supplied an argument the store cannot honour.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// An index permutation specification was malformed.
    #[error("invalid value '{spec}' in index specification: {reason}")]
    InvalidIndexSpec {
        /// The offending specification token.
        spec: String,
        /// Why the token was rejected.
        reason: &'static str,
    },
    /// The data directory holds quads written by an incompatible version.
    #[error("directory contains incompatible triple data (schema version {found})")]
    IncompatibleSchema {
        /// Version found on disk.
        found: u32,
    },
    /// The metadata properties file could not be parsed or written.
    #[error("config: {0}")]
    Config(String),
    /// A lock could not be acquired before the configured timeout.
    #[error("timed out waiting for {0} lock")]
    LockTimeout(&'static str),
    /// A blocked lock acquisition was interrupted.
    #[error("lock acquisition interrupted")]
    Interrupted,
    /// A previous commit failed part-way; the store must be reopened.
    #[error("store requires recovery after a failed commit; reopen it")]
    NeedsRecovery,
    /// The requested entity does not exist.
    #[error("not found")]
    NotFound,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, QuadStoreError>;
