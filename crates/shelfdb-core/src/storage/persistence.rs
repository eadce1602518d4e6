//! Table files: encoding, loading, and crash-safe atomic replacement.
//!
//! Every table lives in one canonical file, `<dir>/<table>.<ext>`. A flush
//! never writes to that file in place. It writes a temporary file in the same
//! directory, fsyncs it, and renames it over the canonical path. The rename is
//! the commit point: before it the old file is intact, after it the new one
//! is complete.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, SchemaError, StorageError};
use crate::record::{Record, TableState};
use crate::types::{FORMAT_VERSION, FileFormat, SyncMode, TEMP_SUFFIX, is_valid_table_name};

/// Envelope written to disk (borrowed form).
#[derive(Serialize)]
struct TableFileRef<'a> {
    format_version: u32,
    table: &'a str,
    next_id: i64,
    records: &'a [Record],
}

/// Envelope read from disk (owned form).
#[derive(Deserialize)]
struct TableFile {
    format_version: u32,
    table: String,
    next_id: i64,
    records: Vec<Record>,
}

/// Points in the flush protocol where a failure can be injected in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushStage {
    /// Temporary file fully written, not yet synced.
    Written,
    /// Temporary file synced, not yet renamed.
    Synced,
}

/// Reads and writes the canonical table files of one database directory.
#[derive(Debug)]
pub struct Persistence {
    dir: PathBuf,
    format: FileFormat,
    pretty: bool,
}

impl Persistence {
    pub fn new(dir: impl Into<PathBuf>, format: FileFormat, pretty: bool) -> Self {
        Self {
            dir: dir.into(),
            format,
            pretty,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Canonical file path for `table`.
    pub fn table_path(&self, table: &str) -> PathBuf {
        self.dir
            .join(format!("{table}.{}", self.format.extension()))
    }

    /// Serialize a table state. Deterministic for a given state.
    pub fn encode(&self, table: &str, state: &TableState) -> Result<Vec<u8>, StorageError> {
        let file = TableFileRef {
            format_version: FORMAT_VERSION,
            table,
            next_id: state.next_id(),
            records: state.records(),
        };
        let encoded = match self.format {
            FileFormat::Json if self.pretty => {
                serde_json::to_vec_pretty(&file).map_err(|e| e.to_string())
            }
            FileFormat::Json => serde_json::to_vec(&file).map_err(|e| e.to_string()),
            FileFormat::MessagePack => rmp_serde::to_vec_named(&file).map_err(|e| e.to_string()),
        };
        encoded.map_err(|reason| StorageError::Encode {
            table: table.to_string(),
            reason,
        })
    }

    /// Parse and validate the bytes of a table file.
    pub fn decode(&self, path: &Path, table: &str, bytes: &[u8]) -> Result<TableState, StorageError> {
        let corrupt = |reason: String| StorageError::CorruptFile {
            path: path.to_path_buf(),
            reason,
        };

        let file: TableFile = match self.format {
            FileFormat::Json => serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?,
            FileFormat::MessagePack => {
                rmp_serde::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?
            }
        };

        if file.format_version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {}",
                file.format_version
            )));
        }
        if file.table != table {
            return Err(corrupt(format!(
                "file belongs to table '{}', expected '{table}'",
                file.table
            )));
        }
        TableState::from_parts(file.records, file.next_id).map_err(corrupt)
    }

    /// Load a table from its canonical file.
    ///
    /// A missing file is `TableNotFound`; an unparseable one is `CorruptFile`.
    pub fn load(&self, table: &str) -> Result<TableState, Error> {
        let path = self.table_path(table);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SchemaError::TableNotFound(table.to_string()).into());
            }
            Err(e) => return Err(StorageError::Io(e).into()),
        };
        let state = self.decode(&path, table, &bytes)?;
        debug!(table, records = state.len(), bytes = bytes.len(), "loaded table");
        Ok(state)
    }

    /// Atomically replace the canonical file of `table` with `state`.
    pub fn flush(&self, table: &str, state: &TableState, sync: SyncMode) -> Result<(), StorageError> {
        let bytes = self.encode(table, state)?;
        self.write_atomic(table, &bytes, sync, &mut |_| Ok(()))?;
        debug!(table, records = state.len(), bytes = bytes.len(), "flushed table");
        Ok(())
    }

    /// The write-fsync-rename protocol. `hook` runs between steps and can
    /// abort the flush; the temporary file is removed on every error path.
    pub(crate) fn write_atomic(
        &self,
        table: &str,
        bytes: &[u8],
        sync: SyncMode,
        hook: &mut dyn FnMut(FlushStage) -> io::Result<()>,
    ) -> Result<(), StorageError> {
        let path = self.table_path(table);

        // Same directory as the target, so the rename stays on one volume.
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{table}."))
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&self.dir)?;

        tmp.write_all(bytes)?;
        tmp.flush()?;
        hook(FlushStage::Written)?;

        if sync == SyncMode::Full {
            tmp.as_file().sync_all()?;
        }
        hook(FlushStage::Synced)?;

        // Commit point.
        tmp.persist(&path).map_err(|e| e.error)?;

        if sync == SyncMode::Full
            && let Err(e) = sync_dir(&self.dir)
        {
            // The rename already happened; the new version is canonical.
            warn!(table, error = %e, "directory fsync failed after rename");
        }
        Ok(())
    }

    /// Remove the canonical file of `table`. Returns false if it did not exist.
    pub fn remove(&self, table: &str) -> Result<bool, StorageError> {
        match fs::remove_file(self.table_path(table)) {
            Ok(()) => {
                if let Err(e) = sync_dir(&self.dir) {
                    warn!(table, error = %e, "directory fsync failed after remove");
                }
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of all tables with a canonical file in the directory, sorted.
    pub fn discover(&self) -> Result<Vec<String>, StorageError> {
        let suffix = format!(".{}", self.format.extension());
        let mut tables = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            match name.strip_suffix(suffix.as_str()) {
                Some(table) if is_valid_table_name(table) => tables.push(table.to_string()),
                _ => {}
            }
        }
        tables.sort();
        Ok(tables)
    }

    /// Delete temporary files left behind by a flush that never reached its
    /// rename (for example after a crash). Returns how many were removed.
    pub fn remove_stale_temps(&self) -> Result<usize, StorageError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
                warn!(file = name, "removing stale temporary file");
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Fsync a directory so that renames and removals inside it are durable.
fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    File::open(dir)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}
