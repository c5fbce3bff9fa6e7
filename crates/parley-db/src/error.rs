use thiserror::Error;

/// Store and registry failures. `Validation` and `NotFound` are the two
/// caller-visible cases; everything else maps to a 5xx-equivalent.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{field} can't be blank")]
    Validation { field: &'static str },

    #[error("user {0} not found")]
    NotFound(i64),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("db lock poisoned: {0}")]
    Lock(String),
}
