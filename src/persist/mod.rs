pub mod sqlite;

/// Errors surfaced by the local store.
///
/// A failing local store is a hard error: sync cannot proceed without it,
/// so these propagate out of `open` and the command layer unwrapped.
#[derive(Debug)]
pub enum PersistError {
    /// Underlying sqlite failure (corruption, locked file, bad path).
    Sqlite(rusqlite::Error),
    /// Stored payload failed to decode.
    Serde(serde_json::Error),
    /// Anything else.
    Message(String),
}

impl From<rusqlite::Error> for PersistError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for PersistError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

impl std::fmt::Display for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistError::Sqlite(e) => write!(f, "local store error: {e}"),
            PersistError::Serde(e) => write!(f, "payload decode error: {e}"),
            PersistError::Message(m) => f.write_str(m),
        }
    }
}

impl std::error::Error for PersistError {}

/// Result alias for local store operations.
pub type PersistResult<T> = Result<T, PersistError>;
