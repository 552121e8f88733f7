pub type AlertResult<T> = std::result::Result<T, AlertError>;

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("schema document does not name a supported alert generation: {0}")]
    UnknownSchema(String),
    #[error("failed to decode alert payload: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("unknown column {column:?} for schema generation {version}")]
    UnknownColumn {
        column: String,
        version: crate::schema::SchemaVersion,
    },
}
