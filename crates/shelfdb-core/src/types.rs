//! Core types and constants: file formats, sync modes, naming rules.

/// Name of the implicit record identifier field.
pub const ID_FIELD: &str = "id";

/// First id handed out by a fresh table.
pub const FIRST_AUTO_ID: i64 = 1;

/// Version stamped into every table file envelope.
pub const FORMAT_VERSION: u32 = 1;

/// Maximum table name length in bytes.
pub const MAX_TABLE_NAME_LEN: usize = 128;

/// Deepest list/map nesting allowed inside a single field value.
///
/// A table file wraps each value in three more levels (envelope, record
/// list, record), which must stay under the JSON decoder's recursion limit
/// of 128.
pub const MAX_NESTING_DEPTH: usize = 100;

/// Advisory lock file held for the lifetime of an open database.
pub const LOCK_FILE_NAME: &str = ".shelfdb.lock";

/// Suffix of the temporary files written during a flush.
pub const TEMP_SUFFIX: &str = ".tmp";

/// On-disk encoding of table files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileFormat {
    /// UTF-8 JSON. Human-readable; compact unless `pretty` is set.
    #[default]
    Json,
    /// MessagePack (map encoding, so field names are kept).
    MessagePack,
}

impl FileFormat {
    /// File extension of canonical table files, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Json => "json",
            FileFormat::MessagePack => "msgpack",
        }
    }
}

/// Controls when `fsync` is called during a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Fsync the temporary file before the rename and the directory after it
    /// (default). Survives a crash between any two write operations.
    #[default]
    Full = 0,
    /// Skip fsync entirely. The rename is still atomic, but a crash may lose
    /// recent writes. Useful for bulk loads and tests.
    None = 1,
}

impl SyncMode {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => SyncMode::Full,
            _ => SyncMode::None,
        }
    }
}

/// Check that a table name is usable as a file name on every platform.
///
/// Names are 1..=128 bytes of ASCII letters, digits, `_` and `-`. A leading
/// dot is impossible, which keeps temporary and lock files out of the table
/// namespace.
pub fn is_valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_TABLE_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        assert!(is_valid_table_name("users"));
        assert!(is_valid_table_name("user_events-2024"));
        assert!(!is_valid_table_name(""));
        assert!(!is_valid_table_name(".hidden"));
        assert!(!is_valid_table_name("a/b"));
        assert!(!is_valid_table_name("a.json"));
        assert!(!is_valid_table_name("naïve"));
        assert!(!is_valid_table_name(&"x".repeat(MAX_TABLE_NAME_LEN + 1)));
        assert!(is_valid_table_name(&"x".repeat(MAX_TABLE_NAME_LEN)));
    }

    #[test]
    fn test_sync_mode_from_u8() {
        assert_eq!(SyncMode::from_u8(SyncMode::Full as u8), SyncMode::Full);
        assert_eq!(SyncMode::from_u8(SyncMode::None as u8), SyncMode::None);
    }
}
