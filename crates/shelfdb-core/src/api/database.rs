use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, SchemaError, StorageError};
use crate::record::{Record, TableState, check_storable};
use crate::storage::lock::DirLock;
use crate::storage::persistence::Persistence;
use crate::types::{FileFormat, ID_FIELD, LOCK_FILE_NAME, SyncMode, is_valid_table_name};
use crate::value::Value;

use super::builders::{
    AddBuilder, BatchImportBuilder, DeleteBuilder, FindBuilder, FindOneBuilder, UpdateBuilder,
};
use super::options::OpenOptions;
use super::predicate::{Predicate, matches_all};
use super::validate::Validator;

/// One table's committed state plus the lock that serializes its writers.
struct TableHandle {
    writer: Mutex<()>,
    /// `None` while the table has no file (never written, dropped or burned).
    state: RwLock<Option<Arc<TableState>>>,
}

impl TableHandle {
    fn new(state: Option<TableState>) -> Self {
        Self {
            writer: Mutex::new(()),
            state: RwLock::new(state.map(Arc::new)),
        }
    }
}

struct DatabaseInner {
    /// Handles are never removed, only emptied, so a writer holding a handle
    /// cannot race with a drop of the same table.
    tables: RwLock<HashMap<String, Arc<TableHandle>>>,
    persistence: Persistence,
    sync_mode: AtomicU8,
    _dir_lock: DirLock,
}

/// Outcome of a table mutation: whether the working copy must be flushed.
pub(crate) enum Write<T> {
    Commit(T),
    Unchanged(T),
}

/// The main database handle.
///
/// `ShelfDB` is cheaply clonable (`Arc`-based) and `Send + Sync`. Writers of
/// the same table are serialized; readers never block and always see a
/// committed version of the table.
#[derive(Clone)]
pub struct ShelfDB {
    inner: Arc<DatabaseInner>,
}

impl ShelfDB {
    /// Open (or create) a database directory with default options.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, Error> {
        OpenOptions::new(dir).open()
    }

    /// Start configuring how a database directory is opened.
    pub fn builder(dir: impl AsRef<Path>) -> OpenOptions {
        OpenOptions::new(dir)
    }

    pub(crate) fn open_with(options: OpenOptions) -> Result<Self, Error> {
        let OpenOptions {
            dir,
            format,
            pretty,
            sync_mode,
        } = options;

        fs::create_dir_all(&dir).map_err(StorageError::from)?;
        let dir_lock = DirLock::try_exclusive(&dir.join(LOCK_FILE_NAME))?;

        let persistence = Persistence::new(&dir, format, pretty);
        let stale = persistence.remove_stale_temps()?;

        let mut tables = HashMap::new();
        let mut records = 0;
        for name in persistence.discover()? {
            let state = persistence.load(&name)?;
            records += state.len();
            tables.insert(name, Arc::new(TableHandle::new(Some(state))));
        }
        info!(
            dir = %dir.display(),
            tables = tables.len(),
            records,
            stale_temps = stale,
            "opened database"
        );

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                tables: RwLock::new(tables),
                persistence,
                sync_mode: AtomicU8::new(sync_mode as u8),
                _dir_lock: dir_lock,
            }),
        })
    }

    /// The database directory.
    pub fn path(&self) -> &Path {
        self.inner.persistence.dir()
    }

    pub fn format(&self) -> FileFormat {
        self.inner.persistence.format()
    }

    /// Set the sync mode (durability level).
    pub fn set_sync_mode(&self, mode: SyncMode) {
        self.inner.sync_mode.store(mode as u8, Ordering::Release);
    }

    /// Get the current sync mode.
    pub fn sync_mode(&self) -> SyncMode {
        SyncMode::from_u8(self.inner.sync_mode.load(Ordering::Acquire))
    }

    /// Names of all tables that currently exist, sorted.
    pub fn list_tables(&self) -> Vec<String> {
        let tables = self.inner.tables.read();
        let mut names: Vec<String> = tables
            .iter()
            .filter(|(_, handle)| handle.state.read().is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Number of records in a table.
    pub fn count(&self, table: &str) -> Result<usize, Error> {
        Ok(self.snapshot(table)?.len())
    }

    /// Insert one record. Returns a builder; `execute` returns the record id.
    pub fn add(&self, table: &str, fields: impl Into<Value>) -> AddBuilder<'_> {
        AddBuilder::new(self, table.to_string(), fields.into())
    }

    /// Insert many records, all or nothing, with a single flush.
    pub fn batch_import<I>(&self, table: &str, records: I) -> BatchImportBuilder<'_>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        BatchImportBuilder::new(
            self,
            table.to_string(),
            records.into_iter().map(Into::into).collect(),
        )
    }

    /// Query records with `field__op` filters.
    pub fn find(&self, table: &str) -> FindBuilder<'_> {
        FindBuilder::new(self, table.to_string())
    }

    /// Like [`find`](Self::find), but returns the first match or
    /// `QueryError::RecordNotFound`.
    pub fn find_one(&self, table: &str) -> FindOneBuilder<'_> {
        FindOneBuilder::new(self, table.to_string())
    }

    /// Merge changes into every record matching the filters.
    pub fn update(&self, table: &str) -> UpdateBuilder<'_> {
        UpdateBuilder::new(self, table.to_string())
    }

    /// Remove every record matching the filters.
    pub fn delete(&self, table: &str) -> DeleteBuilder<'_> {
        DeleteBuilder::new(self, table.to_string())
    }

    /// Return copies of every record for which `f` returns true.
    ///
    /// For conditions the `field__op` grammar cannot express.
    pub fn scan<F>(&self, table: &str, f: F) -> Result<Vec<Record>, Error>
    where
        F: Fn(&Record) -> bool,
    {
        let snapshot = self.snapshot(table)?;
        Ok(snapshot.records().iter().filter(|r| f(r)).cloned().collect())
    }

    /// Remove every record but keep the table. Ids are not reused afterwards.
    pub fn truncate_table(&self, table: &str) -> Result<usize, Error> {
        let removed = self.write_table(table, false, |state| {
            let n = state.len();
            if n == 0 {
                return Ok(Write::Unchanged(0));
            }
            state.clear();
            Ok(Write::Commit(n))
        })?;
        info!(table, removed, "truncated table");
        Ok(removed)
    }

    /// Delete a table's file and forget its records.
    pub fn drop_table(&self, table: &str) -> Result<(), Error> {
        check_table_name(table)?;
        let handle = self.handle(table).ok_or_else(|| not_found(table))?;
        let _writer_guard = handle.writer.lock();

        if handle.state.read().is_none() {
            return Err(not_found(table));
        }
        self.inner.persistence.remove(table)?;
        *handle.state.write() = None;

        info!(table, "dropped table");
        Ok(())
    }

    /// Delete every table file in the directory and clear all in-memory
    /// state. The handle stays open and usable; the directory lock is kept.
    ///
    /// Returns the names of the removed tables, sorted.
    ///
    /// Tables are removed one at a time in name order. If a removal fails the
    /// result is [`StorageError::BurnIncomplete`]: the tables it lists as
    /// burned are gone from disk and memory, the failing table and every
    /// table after it are intact and still readable.
    pub fn burn_it_all(&self) -> Result<Vec<String>, Error> {
        let tables = self.inner.tables.write();
        // Wait for in-flight writers; nobody can start a new one while the
        // map is write-locked.
        let _writer_guards: Vec<_> = tables.values().map(|h| h.writer.lock()).collect();

        // Loaded tables plus files this handle never loaded.
        let mut names: BTreeSet<String> = tables
            .iter()
            .filter(|(_, handle)| handle.state.read().is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.extend(self.inner.persistence.discover()?);

        let mut burned = Vec::with_capacity(names.len());
        for name in names {
            if let Err(e) = self.inner.persistence.remove(&name) {
                warn!(table = %name, error = %e, burned = burned.len(), "burn stopped");
                return Err(StorageError::BurnIncomplete {
                    burned,
                    table: name,
                    source: Box::new(e),
                }
                .into());
            }
            if let Some(handle) = tables.get(&name) {
                *handle.state.write() = None;
            }
            burned.push(name);
        }
        // Leftover temporaries are also swept on the next open.
        if let Err(e) = self.inner.persistence.remove_stale_temps() {
            warn!(error = %e, "failed to remove stale temporary files");
        }

        info!(dir = %self.path().display(), tables = burned.len(), "burned all tables");
        Ok(burned)
    }

    // -----------------------------------------------------------------------
    // Internals shared with the builders
    // -----------------------------------------------------------------------

    fn handle(&self, table: &str) -> Option<Arc<TableHandle>> {
        self.inner.tables.read().get(table).cloned()
    }

    fn handle_or_insert(&self, table: &str) -> Arc<TableHandle> {
        if let Some(handle) = self.handle(table) {
            return handle;
        }
        self.inner
            .tables
            .write()
            .entry(table.to_string())
            .or_insert_with(|| Arc::new(TableHandle::new(None)))
            .clone()
    }

    /// The latest committed state of a table. Readers scan it without locks.
    pub(crate) fn snapshot(&self, table: &str) -> Result<Arc<TableState>, Error> {
        check_table_name(table)?;
        self.handle(table)
            .and_then(|handle| handle.state.read().clone())
            .ok_or_else(|| not_found(table))
    }

    /// Run a mutation against a private copy of a table, then flush and
    /// publish the copy.
    ///
    /// The table's writer lock is held for the whole sequence. If `f` or the
    /// flush fails, the copy is discarded and the committed state (in memory
    /// and on disk) is unchanged. With `create`, a missing table starts out
    /// empty; otherwise it is `TableNotFound`.
    pub(crate) fn write_table<T, F>(&self, table: &str, create: bool, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut TableState) -> Result<Write<T>, Error>,
    {
        check_table_name(table)?;
        let handle = if create {
            self.handle_or_insert(table)
        } else {
            self.handle(table).ok_or_else(|| not_found(table))?
        };

        let _writer_guard = handle.writer.lock();

        let current = handle.state.read().clone();
        let mut working = match current {
            Some(state) => TableState::clone(&state),
            None if create => TableState::new(),
            None => return Err(not_found(table)),
        };

        match f(&mut working)? {
            Write::Unchanged(out) => Ok(out),
            Write::Commit(out) => {
                self.inner
                    .persistence
                    .flush(table, &working, self.sync_mode())?;
                *handle.state.write() = Some(Arc::new(working));
                Ok(out)
            }
        }
    }

    /// Prepare, validate and append `records`; flush once. Any failure
    /// discards the whole batch.
    pub(crate) fn insert(
        &self,
        table: &str,
        records: Vec<Value>,
        validator: Option<&dyn Validator>,
    ) -> Result<Vec<Value>, Error> {
        check_table_name(table)?;
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let ids = self.write_table(table, true, |state| {
            let mut ids = Vec::with_capacity(records.len());
            for fields in records {
                let record = state.prepare(table, fields)?;
                if let Some(validator) = validator {
                    validator.validate(&record).map_err(|reason| {
                        SchemaError::ValidationFailed {
                            table: table.to_string(),
                            reason,
                        }
                    })?;
                }
                ids.push(record.id().clone());
                state.push(record);
            }
            Ok(Write::Commit(ids))
        })?;
        debug!(table, inserted = ids.len(), "inserted records");
        Ok(ids)
    }

    pub(crate) fn update_where(
        &self,
        table: &str,
        predicates: &[Predicate],
        changes: &BTreeMap<String, Value>,
    ) -> Result<usize, Error> {
        if changes.contains_key(ID_FIELD) {
            return Err(SchemaError::ImmutableId(table.to_string()).into());
        }
        check_storable(changes.values())?;

        let updated = self.write_table(table, false, |state| {
            let mut n = 0;
            for record in state.records_mut() {
                if matches_all(predicates, record)? {
                    record.merge(changes);
                    n += 1;
                }
            }
            Ok(if n == 0 {
                Write::Unchanged(0)
            } else {
                Write::Commit(n)
            })
        })?;
        debug!(table, updated, "updated records");
        Ok(updated)
    }

    pub(crate) fn delete_where(&self, table: &str, predicates: &[Predicate]) -> Result<usize, Error> {
        let deleted = self.write_table(table, false, |state| {
            let n = state.remove_where(|record| matches_all(predicates, record))?;
            Ok(if n == 0 {
                Write::Unchanged(0)
            } else {
                Write::Commit(n)
            })
        })?;
        debug!(table, deleted, "deleted records");
        Ok(deleted)
    }
}

fn check_table_name(table: &str) -> Result<(), Error> {
    if is_valid_table_name(table) {
        Ok(())
    } else {
        Err(SchemaError::InvalidTableName(table.to_string()).into())
    }
}

fn not_found(table: &str) -> Error {
    SchemaError::TableNotFound(table.to_string()).into()
}
