/// Errors surfaced by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An underlying SQLite error.
    #[error("storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem-level failure while opening the database.
    #[error("storage: io error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted value could not be interpreted (bad enum string, bad
    /// timestamp). Indicates external modification or a schema drift bug.
    #[error("storage: invalid value in column '{column}': {detail}")]
    InvalidColumn {
        column: &'static str,
        detail: String,
    },
}

/// Convenience alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
