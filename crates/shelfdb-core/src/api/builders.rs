use std::collections::BTreeMap;

use crate::error::{Error, QueryError, SchemaError};
use crate::record::Record;
use crate::value::Value;

use super::database::ShelfDB;
use super::predicate::Predicate;
use super::query::Matches;
use super::validate::Validator;

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Predicates collected by a builder. A key that fails to compile is kept
/// as an error and reported by `execute`.
#[derive(Debug, Default)]
struct Filters {
    predicates: Vec<Predicate>,
    error: Option<QueryError>,
}

impl Filters {
    fn push(&mut self, key: &str, operand: Value) {
        if self.error.is_some() {
            return;
        }
        match Predicate::compile(key, operand) {
            Ok(predicate) => self.predicates.push(predicate),
            Err(e) => self.error = Some(e),
        }
    }

    fn finish(self) -> Result<Vec<Predicate>, Error> {
        match self.error {
            Some(e) => Err(e.into()),
            None => Ok(self.predicates),
        }
    }
}

/// Adds the shared filter methods to a builder with a `filters` field.
macro_rules! filter_methods {
    () => {
        /// Add a `field__operator` condition (`"age__gte"`, `"name"`, ...).
        /// All conditions must hold.
        pub fn filter(mut self, key: &str, operand: impl Into<Value>) -> Self {
            self.filters.push(key, operand.into());
            self
        }

        /// Add several conditions at once.
        pub fn filters<I, K, V>(mut self, conditions: I) -> Self
        where
            I: IntoIterator<Item = (K, V)>,
            K: AsRef<str>,
            V: Into<Value>,
        {
            for (key, operand) in conditions {
                self.filters.push(key.as_ref(), operand.into());
            }
            self
        }

        /// Add an already compiled predicate.
        pub fn predicate(mut self, predicate: Predicate) -> Self {
            self.filters.predicates.push(predicate);
            self
        }
    };
}

// ---------------------------------------------------------------------------
// AddBuilder
// ---------------------------------------------------------------------------

/// Builder for inserting a single record.
pub struct AddBuilder<'a> {
    db: &'a ShelfDB,
    table: String,
    fields: Value,
    validator: Option<Box<dyn Validator + 'a>>,
}

impl<'a> AddBuilder<'a> {
    pub(crate) fn new(db: &'a ShelfDB, table: String, fields: Value) -> Self {
        Self {
            db,
            table,
            fields,
            validator: None,
        }
    }

    /// Reject the record unless `validator` accepts it.
    pub fn validator(mut self, validator: impl Validator + 'a) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Insert the record and return its id.
    pub fn execute(self) -> Result<Value, Error> {
        let mut ids = self
            .db
            .insert(&self.table, vec![self.fields], self.validator.as_deref())?;
        ids.pop()
            .ok_or_else(|| SchemaError::InvalidRecord("no record was inserted".to_string()).into())
    }
}

// ---------------------------------------------------------------------------
// BatchImportBuilder
// ---------------------------------------------------------------------------

/// Builder for inserting many records atomically.
pub struct BatchImportBuilder<'a> {
    db: &'a ShelfDB,
    table: String,
    records: Vec<Value>,
    validator: Option<Box<dyn Validator + 'a>>,
}

impl<'a> BatchImportBuilder<'a> {
    pub(crate) fn new(db: &'a ShelfDB, table: String, records: Vec<Value>) -> Self {
        Self {
            db,
            table,
            records,
            validator: None,
        }
    }

    /// Validate every record; one rejection aborts the whole batch.
    pub fn validator(mut self, validator: impl Validator + 'a) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Insert all records and return their ids, in input order.
    pub fn execute(self) -> Result<Vec<Value>, Error> {
        self.db
            .insert(&self.table, self.records, self.validator.as_deref())
    }
}

// ---------------------------------------------------------------------------
// FindBuilder
// ---------------------------------------------------------------------------

/// Builder for querying records.
pub struct FindBuilder<'a> {
    db: &'a ShelfDB,
    table: String,
    filters: Filters,
    limit: Option<usize>,
}

impl<'a> FindBuilder<'a> {
    pub(crate) fn new(db: &'a ShelfDB, table: String) -> Self {
        Self {
            db,
            table,
            filters: Filters::default(),
            limit: None,
        }
    }

    filter_methods!();

    /// Stop after this many matches.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Take a snapshot of the table and return the (lazy) matches.
    pub fn execute(self) -> Result<Matches, Error> {
        let predicates = self.filters.finish()?;
        let snapshot = self.db.snapshot(&self.table)?;
        Ok(Matches::new(self.table, snapshot, predicates, self.limit))
    }
}

// ---------------------------------------------------------------------------
// FindOneBuilder
// ---------------------------------------------------------------------------

/// Builder for fetching the first matching record.
pub struct FindOneBuilder<'a> {
    db: &'a ShelfDB,
    table: String,
    filters: Filters,
}

impl<'a> FindOneBuilder<'a> {
    pub(crate) fn new(db: &'a ShelfDB, table: String) -> Self {
        Self {
            db,
            table,
            filters: Filters::default(),
        }
    }

    filter_methods!();

    /// Return the first match in insertion order.
    pub fn execute(self) -> Result<Record, Error> {
        let predicates = self.filters.finish()?;
        let snapshot = self.db.snapshot(&self.table)?;
        let matches = Matches::new(self.table, snapshot, predicates, Some(1));
        match matches.first()? {
            Some(record) => Ok(record.clone()),
            None => Err(QueryError::RecordNotFound(matches.table().to_string()).into()),
        }
    }
}

// ---------------------------------------------------------------------------
// UpdateBuilder
// ---------------------------------------------------------------------------

/// Builder for updating every matching record.
pub struct UpdateBuilder<'a> {
    db: &'a ShelfDB,
    table: String,
    filters: Filters,
    changes: BTreeMap<String, Value>,
    invalid: Option<Error>,
}

impl<'a> UpdateBuilder<'a> {
    pub(crate) fn new(db: &'a ShelfDB, table: String) -> Self {
        Self {
            db,
            table,
            filters: Filters::default(),
            changes: BTreeMap::new(),
            invalid: None,
        }
    }

    filter_methods!();

    /// Set a top-level field on every match.
    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.changes.insert(field.to_string(), value.into());
        self
    }

    /// Set every field of a map (for example a `json!({...})` object).
    pub fn changes(mut self, changes: impl Into<Value>) -> Self {
        match changes.into() {
            Value::Map(map) => self.changes.extend(map),
            other => {
                self.invalid.get_or_insert_with(|| {
                    SchemaError::InvalidRecord(format!(
                        "update changes must be a map, got {}",
                        other.kind()
                    ))
                    .into()
                });
            }
        }
        self
    }

    /// Apply the changes and return how many records were updated.
    pub fn execute(self) -> Result<usize, Error> {
        if let Some(e) = self.invalid {
            return Err(e);
        }
        let predicates = self.filters.finish()?;
        self.db.update_where(&self.table, &predicates, &self.changes)
    }
}

// ---------------------------------------------------------------------------
// DeleteBuilder
// ---------------------------------------------------------------------------

/// Builder for deleting every matching record.
pub struct DeleteBuilder<'a> {
    db: &'a ShelfDB,
    table: String,
    filters: Filters,
}

impl<'a> DeleteBuilder<'a> {
    pub(crate) fn new(db: &'a ShelfDB, table: String) -> Self {
        Self {
            db,
            table,
            filters: Filters::default(),
        }
    }

    filter_methods!();

    /// Delete the matches and return how many were removed.
    pub fn execute(self) -> Result<usize, Error> {
        let predicates = self.filters.finish()?;
        self.db.delete_where(&self.table, &predicates)
    }
}
