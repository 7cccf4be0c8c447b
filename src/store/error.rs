#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// `(entity, id)`: a referenced record does not exist.
    NotFound(&'static str, String),
    /// `(entity, id)`: a record with this id is already stored.
    AlreadyExists(&'static str, String),
    WalError(String),
    /// A thread panicked while holding the write lock.
    Poisoned,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(entity, id) => write!(f, "{entity} not found: {id}"),
            StoreError::AlreadyExists(entity, id) => write!(f, "{entity} already exists: {id}"),
            StoreError::WalError(e) => write!(f, "WAL error: {e}"),
            StoreError::Poisoned => write!(f, "store poisoned by an earlier panic"),
        }
    }
}

impl std::error::Error for StoreError {}
