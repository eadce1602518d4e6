//! Lazy query results over a table snapshot.

use std::sync::Arc;

use crate::error::EvalError;
use crate::record::{Record, TableState};

use super::predicate::{Predicate, matches_all};

/// The records of one table that satisfy a set of predicates.
///
/// Holds a snapshot of the table taken when the query executed, so later
/// writes never show up in (or tear) an existing result. Iteration is lazy:
/// each pass re-scans the snapshot in insertion order, so a `Matches` can be
/// iterated any number of times with the same outcome.
#[derive(Debug, Clone)]
pub struct Matches {
    table: String,
    snapshot: Arc<TableState>,
    predicates: Vec<Predicate>,
    limit: Option<usize>,
}

impl Matches {
    pub(crate) fn new(
        table: String,
        snapshot: Arc<TableState>,
        predicates: Vec<Predicate>,
        limit: Option<usize>,
    ) -> Self {
        Self {
            table,
            snapshot,
            predicates,
            limit,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Start a new pass over the snapshot.
    pub fn iter(&self) -> MatchIter<'_> {
        MatchIter {
            records: self.snapshot.records().iter(),
            predicates: &self.predicates,
            remaining: self.limit,
        }
    }

    /// Collect owned copies of every match. Fails on the first record a
    /// predicate cannot be evaluated against.
    pub fn to_vec(&self) -> Result<Vec<Record>, EvalError> {
        self.iter().map(|r| r.cloned()).collect()
    }

    /// Number of matching records.
    pub fn count(&self) -> Result<usize, EvalError> {
        self.iter().try_fold(0, |n, r| r.map(|_| n + 1))
    }

    pub fn first(&self) -> Result<Option<&Record>, EvalError> {
        self.iter().next().transpose()
    }

    /// Field values of every match, serialized to JSON.
    pub fn to_json(&self) -> Result<serde_json::Value, EvalError> {
        self.iter()
            .map(|r| r.map(Record::to_json))
            .collect::<Result<Vec<_>, _>>()
            .map(serde_json::Value::Array)
    }
}

impl<'a> IntoIterator for &'a Matches {
    type Item = Result<&'a Record, EvalError>;
    type IntoIter = MatchIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the records of a [`Matches`].
///
/// A record the predicates cannot be evaluated against yields `Err`; the
/// scan continues with the next record afterwards.
pub struct MatchIter<'a> {
    records: std::slice::Iter<'a, Record>,
    predicates: &'a [Predicate],
    remaining: Option<usize>,
}

impl<'a> Iterator for MatchIter<'a> {
    type Item = Result<&'a Record, EvalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        for record in self.records.by_ref() {
            match matches_all(self.predicates, record) {
                Ok(false) => continue,
                Ok(true) => {
                    if let Some(n) = self.remaining.as_mut() {
                        *n -= 1;
                    }
                    return Some(Ok(record));
                }
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}
