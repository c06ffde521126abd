use thiserror::Error;

#[derive(Debug, Error)]
pub enum SieveError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Persist: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("Bad magic or version")]
    BadHeader,

    #[error("Unsupported hash scheme")]
    Unsupported,

    #[error("Corrupt filter data")]
    Corrupt,

    #[error("Invalid filter parameters: {0}")]
    InvalidParams(String),

    #[error("Key '{0}' already exists.")]
    DuplicateKey(String),

    #[error("Empty key")]
    EmptyKey,
}

pub type Result<T> = std::result::Result<T, SieveError>;
