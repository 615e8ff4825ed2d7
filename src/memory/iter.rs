//! Pattern matching over the statement table.

use tracing::trace;

use super::statement::{MemStatement, ReadMode, Statement, StatementId, StatementTable};
use super::values::{TermId, TermRegistry};
use super::MemoryState;
use crate::model::Term;
use crate::primitives::concurrency::DataReadGuard;
use crate::types::Field;

/// A statement pattern over terms. `None` fields are wildcards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TermPattern {
    /// Bound subject.
    pub subject: Option<Term>,
    /// Bound predicate.
    pub predicate: Option<Term>,
    /// Bound object.
    pub object: Option<Term>,
    /// Bound context; `Some(None)` selects the default graph.
    pub context: Option<Option<Term>>,
}

impl TermPattern {
    /// Pattern matching every statement.
    pub fn any() -> Self {
        Self::default()
    }

    /// Binds the subject.
    pub fn subject(mut self, term: Term) -> Self {
        self.subject = Some(term);
        self
    }

    /// Binds the predicate.
    pub fn predicate(mut self, term: Term) -> Self {
        self.predicate = Some(term);
        self
    }

    /// Binds the object.
    pub fn object(mut self, term: Term) -> Self {
        self.object = Some(term);
        self
    }

    /// Binds the context; `None` selects the default graph.
    pub fn context(mut self, context: Option<Term>) -> Self {
        self.context = Some(context);
        self
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ContextFilter {
    Any,
    Default,
    Named(TermId),
}

/// A pattern whose terms have been resolved to registry handles.
#[derive(Copy, Clone, Debug)]
pub(crate) struct ResolvedPattern {
    subject: Option<TermId>,
    predicate: Option<TermId>,
    object: Option<TermId>,
    context: ContextFilter,
}

impl ResolvedPattern {
    /// Resolves `pattern`, or returns `None` when a bound term is unknown
    /// and nothing can match.
    pub(crate) fn resolve(pattern: &TermPattern, terms: &TermRegistry) -> Option<Self> {
        let lookup = |term: &Option<Term>| match term {
            Some(term) => terms.get_id(term).map(Some),
            None => Some(None),
        };
        let context = match &pattern.context {
            None => ContextFilter::Any,
            Some(None) => ContextFilter::Default,
            Some(Some(term)) => ContextFilter::Named(terms.get_id(term)?),
        };
        Some(Self {
            subject: lookup(&pattern.subject)?,
            predicate: lookup(&pattern.predicate)?,
            object: lookup(&pattern.object)?,
            context,
        })
    }

    pub(crate) fn matches(&self, st: &MemStatement) -> bool {
        let bound = |want: Option<TermId>, have: TermId| want.map_or(true, |id| id == have);
        bound(self.subject, st.key.subject)
            && bound(self.predicate, st.key.predicate)
            && bound(self.object, st.key.object)
            && match self.context {
                ContextFilter::Any => true,
                ContextFilter::Default => st.key.context.is_none(),
                ContextFilter::Named(id) => st.key.context == Some(id),
            }
    }

    /// Cursor over the shortest adjacency list of a bound term, or over
    /// the whole table when nothing usable is bound.
    pub(crate) fn cursor(&self, terms: &TermRegistry) -> Cursor {
        let candidates = [
            self.subject.map(|id| (id, Field::Subject)),
            self.predicate.map(|id| (id, Field::Predicate)),
            self.object.map(|id| (id, Field::Object)),
            match self.context {
                ContextFilter::Named(id) => Some((id, Field::Context)),
                _ => None,
            },
        ];
        let source = candidates
            .into_iter()
            .flatten()
            .min_by_key(|(id, field)| terms.list(*id, *field).len())
            .map_or(Source::Table, |(id, field)| Source::List(id, field));
        Cursor { source, pos: 0 }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Source {
    Table,
    List(TermId, Field),
}

/// Position within a candidate source.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Cursor {
    source: Source,
    pos: usize,
}

impl Cursor {
    /// Next candidate statement. The structures must not change between
    /// calls.
    pub(crate) fn advance(
        &mut self,
        terms: &TermRegistry,
        statements: &StatementTable,
    ) -> Option<StatementId> {
        match self.source {
            Source::List(id, field) => {
                let next = terms.list(id, field).get(self.pos).copied();
                self.pos += 1;
                next
            }
            Source::Table => {
                while self.pos < statements.capacity() {
                    // Slot count is bounded by u32 in the table.
                    let id = StatementId(self.pos as u32);
                    self.pos += 1;
                    if statements.get(id).is_some() {
                        return Some(id);
                    }
                }
                None
            }
        }
    }
}

/// Streams statements matching a pattern in one read mode.
///
/// Holds the data read lock until exhausted, closed or dropped.
pub struct StatementIter {
    guard: Option<DataReadGuard<MemoryState>>,
    pattern: Option<ResolvedPattern>,
    cursor: Option<Cursor>,
    mode: ReadMode,
    explicit_only: bool,
}

impl StatementIter {
    pub(crate) fn new(
        guard: DataReadGuard<MemoryState>,
        pattern: &TermPattern,
        mode: ReadMode,
        explicit_only: bool,
    ) -> Self {
        let resolved = ResolvedPattern::resolve(pattern, &guard.terms);
        let cursor = resolved.map(|p| p.cursor(&guard.terms));
        let mut iter = Self {
            guard: Some(guard),
            pattern: resolved,
            cursor,
            mode,
            explicit_only,
        };
        if iter.pattern.is_none() {
            iter.close();
        }
        iter
    }

    /// Releases the read lock. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.guard.take().is_some() {
            trace!("memory.query.close");
        }
    }

    /// True once the read lock has been released.
    pub fn is_closed(&self) -> bool {
        self.guard.is_none()
    }

    fn step(&mut self) -> Option<Option<Statement>> {
        let guard = self.guard.as_ref()?;
        let pattern = self.pattern.as_ref()?;
        let cursor = self.cursor.as_mut()?;
        while let Some(id) = cursor.advance(&guard.terms, &guard.statements) {
            let Some(st) = guard.statements.get(id) else {
                continue;
            };
            if pattern.matches(st) && st.is_visible(self.mode, self.explicit_only) {
                if let Some(resolved) = guard.resolve(st) {
                    return Some(Some(resolved));
                }
            }
        }
        Some(None)
    }
}

impl Iterator for StatementIter {
    type Item = Statement;

    fn next(&mut self) -> Option<Statement> {
        match self.step() {
            Some(Some(statement)) => Some(statement),
            _ => {
                self.close();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::statement::{StatementKey, TxnStatus};

    #[test]
    fn unknown_terms_resolve_to_nothing() {
        let mut terms = TermRegistry::new();
        terms.intern(&Term::uri("urn:a")).unwrap();
        let known = TermPattern::any().subject(Term::uri("urn:a")).context(None);
        assert!(ResolvedPattern::resolve(&known, &terms).is_some());
        let unknown = TermPattern::any().object(Term::uri("urn:missing"));
        assert!(ResolvedPattern::resolve(&unknown, &terms).is_none());
    }

    #[test]
    fn cursor_walks_the_shortest_list() {
        let mut terms = TermRegistry::new();
        let mut table = StatementTable::new();
        let s = terms.intern(&Term::uri("urn:s")).unwrap();
        let p = terms.intern(&Term::uri("urn:p")).unwrap();
        for n in 0..4 {
            let o = terms.intern(&Term::literal(n.to_string())).unwrap();
            let key = StatementKey {
                subject: if n == 0 { s } else { o },
                predicate: p,
                object: o,
                context: None,
            };
            let id = table
                .insert(MemStatement {
                    key,
                    explicit: true,
                    status: TxnStatus::Neutral,
                })
                .unwrap();
            terms.link(key.subject, Field::Subject, id);
            terms.link(p, Field::Predicate, id);
            terms.link(o, Field::Object, id);
        }
        let pattern = TermPattern::any()
            .subject(Term::uri("urn:s"))
            .predicate(Term::uri("urn:p"));
        let resolved = ResolvedPattern::resolve(&pattern, &terms).unwrap();
        let mut cursor = resolved.cursor(&terms);
        assert_eq!(cursor.source, Source::List(s, Field::Subject));
        let mut seen = Vec::new();
        while let Some(id) = cursor.advance(&terms, &table) {
            seen.push(id);
        }
        assert_eq!(seen.len(), 1);

        let mut all = ResolvedPattern::resolve(&TermPattern::any(), &terms)
            .unwrap()
            .cursor(&terms);
        let mut count = 0;
        while all.advance(&terms, &table).is_some() {
            count += 1;
        }
        assert_eq!(count, 4);
    }
}
