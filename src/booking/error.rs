use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// The request failed validation. Carries the first validation message verbatim.
    InvalidArgument(String),
    /// The store failed underneath an otherwise valid request.
    Store(StoreError),
}

impl BookingError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, BookingError::InvalidArgument(_))
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::InvalidArgument(msg) => write!(f, "{msg}"),
            BookingError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for BookingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BookingError::InvalidArgument(_) => None,
            BookingError::Store(e) => Some(e),
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        BookingError::Store(e)
    }
}
