pub type IndexResult<T> = std::result::Result<T, IndexError>;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The statement was cancelled by the configured statement timeout.
    /// Safe to retry with a narrower scan.
    #[error("statement cancelled by the configured timeout")]
    Timeout,
    #[error("result group {0:?} already exists")]
    DuplicateGroup(String),
    #[error("result group {0:?} not found")]
    GroupNotFound(String),
    #[error(transparent)]
    Database(sqlx::Error),
}

impl IndexError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, IndexError::Timeout)
    }
}

impl From<sqlx::Error> for IndexError {
    fn from(err: sqlx::Error) -> Self {
        // 57014 = query_canceled, raised when statement_timeout fires.
        if let sqlx::Error::Database(db) = &err {
            if db.code().as_deref() == Some("57014") {
                return IndexError::Timeout;
            }
        }
        IndexError::Database(err)
    }
}
