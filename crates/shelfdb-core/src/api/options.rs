use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::types::{FileFormat, SyncMode};

use super::database::ShelfDB;

/// Configuration used when opening a database directory.
///
/// ```no_run
/// use shelfdb_core::api::ShelfDB;
/// use shelfdb_core::types::{FileFormat, SyncMode};
///
/// let db = ShelfDB::builder("data")
///     .format(FileFormat::Json)
///     .pretty(true)
///     .sync_mode(SyncMode::None)
///     .open()
///     .unwrap();
/// # drop(db);
/// ```
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub(crate) dir: PathBuf,
    pub(crate) format: FileFormat,
    pub(crate) pretty: bool,
    pub(crate) sync_mode: SyncMode,
}

impl OpenOptions {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            format: FileFormat::default(),
            pretty: false,
            sync_mode: SyncMode::default(),
        }
    }

    /// On-disk encoding of table files. Existing files in another format are
    /// not picked up.
    pub fn format(mut self, format: FileFormat) -> Self {
        self.format = format;
        self
    }

    /// Pretty-print JSON table files. Ignored for MessagePack.
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Initial sync mode; can be changed later with [`ShelfDB::set_sync_mode`].
    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    /// Create the directory if needed, lock it and load every table in it.
    pub fn open(self) -> Result<ShelfDB, Error> {
        ShelfDB::open_with(self)
    }
}
