//! RDF terms and namespace declarations, plus their binary encoding.

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use crate::primitives::bytes::stream::{read_str, read_u8, write_str, write_u8, StrWidth};
use crate::types::{QuadStoreError, Result};

/// Marker byte preceding an encoded URI.
pub const URI_MARKER: u8 = 6;
/// Marker byte preceding an encoded blank node.
pub const BNODE_MARKER: u8 = 7;
/// Marker byte preceding a literal without language or datatype.
pub const PLAIN_LITERAL_MARKER: u8 = 8;
/// Marker byte preceding a language-tagged literal.
pub const LANG_LITERAL_MARKER: u8 = 9;
/// Marker byte preceding a datatyped literal.
pub const DATATYPE_LITERAL_MARKER: u8 = 10;

/// An RDF term.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    /// An IRI reference.
    Uri(Arc<str>),
    /// A blank node identified by its label.
    BNode(Arc<str>),
    /// A literal value.
    Literal(Literal),
}

/// Literal with optional language tag or datatype IRI.
///
/// A literal never carries both; constructors enforce that.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Literal {
    label: Arc<str>,
    language: Option<Arc<str>>,
    datatype: Option<Arc<str>>,
}

impl Literal {
    /// Lexical form.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Language tag, if any.
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Datatype IRI, if any.
    pub fn datatype(&self) -> Option<&str> {
        self.datatype.as_deref()
    }
}

impl Term {
    /// Creates an IRI term.
    pub fn uri(value: impl AsRef<str>) -> Self {
        Term::Uri(Arc::from(value.as_ref()))
    }

    /// Creates a blank node term.
    pub fn bnode(id: impl AsRef<str>) -> Self {
        Term::BNode(Arc::from(id.as_ref()))
    }

    /// Creates a plain literal.
    pub fn literal(label: impl AsRef<str>) -> Self {
        Term::Literal(Literal {
            label: Arc::from(label.as_ref()),
            language: None,
            datatype: None,
        })
    }

    /// Creates a language-tagged literal. Tags are stored lowercased.
    pub fn lang_literal(label: impl AsRef<str>, language: impl AsRef<str>) -> Self {
        Term::Literal(Literal {
            label: Arc::from(label.as_ref()),
            language: Some(Arc::from(language.as_ref().to_ascii_lowercase())),
            datatype: None,
        })
    }

    /// Creates a datatyped literal.
    pub fn typed_literal(label: impl AsRef<str>, datatype: impl AsRef<str>) -> Self {
        Term::Literal(Literal {
            label: Arc::from(label.as_ref()),
            language: None,
            datatype: Some(Arc::from(datatype.as_ref())),
        })
    }

    /// True for IRIs and blank nodes, the only terms allowed as subjects
    /// and contexts.
    pub fn is_resource(&self) -> bool {
        matches!(self, Term::Uri(_) | Term::BNode(_))
    }

    /// True for IRIs, the only terms allowed as predicates.
    pub fn is_uri(&self) -> bool {
        matches!(self, Term::Uri(_))
    }

    /// Writes the term as a marker byte followed by its strings, each with a
    /// length prefix of `width`.
    pub fn encode<W: Write>(&self, out: &mut W, width: StrWidth) -> Result<()> {
        match self {
            Term::Uri(uri) => {
                write_u8(out, URI_MARKER)?;
                write_str(out, uri, width)?;
            }
            Term::BNode(id) => {
                write_u8(out, BNODE_MARKER)?;
                write_str(out, id, width)?;
            }
            Term::Literal(lit) => match (&lit.language, &lit.datatype) {
                (Some(lang), _) => {
                    write_u8(out, LANG_LITERAL_MARKER)?;
                    write_str(out, &lit.label, width)?;
                    write_str(out, lang, width)?;
                }
                (None, Some(datatype)) => {
                    write_u8(out, DATATYPE_LITERAL_MARKER)?;
                    write_str(out, &lit.label, width)?;
                    write_u8(out, URI_MARKER)?;
                    write_str(out, datatype, width)?;
                }
                (None, None) => {
                    write_u8(out, PLAIN_LITERAL_MARKER)?;
                    write_str(out, &lit.label, width)?;
                }
            },
        }
        Ok(())
    }

    /// Reads a term whose marker byte has already been consumed.
    pub fn decode_after_marker<R: Read>(marker: u8, src: &mut R, width: StrWidth) -> Result<Self> {
        match marker {
            URI_MARKER => Ok(Term::uri(read_str(src, width)?)),
            BNODE_MARKER => Ok(Term::bnode(read_str(src, width)?)),
            PLAIN_LITERAL_MARKER => Ok(Term::literal(read_str(src, width)?)),
            LANG_LITERAL_MARKER => {
                let label = read_str(src, width)?;
                let lang = read_str(src, width)?;
                Ok(Term::lang_literal(label, lang))
            }
            DATATYPE_LITERAL_MARKER => {
                let label = read_str(src, width)?;
                match Term::decode(src, width)? {
                    Term::Uri(datatype) => Ok(Term::typed_literal(label, datatype)),
                    _ => Err(QuadStoreError::Corruption("literal datatype is not a URI")),
                }
            }
            _ => Err(QuadStoreError::Corruption("unknown term marker")),
        }
    }

    /// Reads a marker byte and the term that follows it.
    pub fn decode<R: Read>(src: &mut R, width: StrWidth) -> Result<Self> {
        let marker = read_u8(src)?;
        Self::decode_after_marker(marker, src, width)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Uri(uri) => write!(f, "<{uri}>"),
            Term::BNode(id) => write!(f, "_:{id}"),
            Term::Literal(lit) => {
                write!(f, "\"{}\"", lit.label.escape_default())?;
                if let Some(lang) = &lit.language {
                    write!(f, "@{lang}")?;
                } else if let Some(datatype) = &lit.datatype {
                    write!(f, "^^<{datatype}>")?;
                }
                Ok(())
            }
        }
    }
}

/// A namespace prefix declaration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    /// Short prefix, e.g. `rdf`.
    pub prefix: String,
    /// Namespace IRI.
    pub name: String,
}

impl Namespace {
    /// Creates a namespace declaration.
    pub fn new(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            name: name.into(),
        }
    }
}
