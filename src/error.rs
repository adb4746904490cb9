use thiserror::Error;

/// Error taxonomy for the core. Operations return `Result<T, CoreError>`;
/// cancellation is never represented here (callers get a partial result instead).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to open volume {drive}: {source}")]
    VolumeOpen { drive: char, source: String },

    #[error("USN journal query failed on {drive}: {source}")]
    JournalQuery { drive: char, source: String },

    #[error("packed record stream truncated at offset {offset}")]
    Truncation { offset: usize },

    #[error("catalog initialization failed: {0}")]
    DbInitialize(String),

    #[error("catalog operation failed: {0}")]
    DbTransient(String),

    #[error("full-text search unavailable, falling back to LIKE: {0}")]
    FtsUnavailable(String),

    #[error("stat failed for {path}: {source}")]
    FilesystemStat { path: String, source: String },

    #[error("USN journal wrapped on {drive}, rebuild required")]
    UsnWraparound { drive: char },
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::DbTransient(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
