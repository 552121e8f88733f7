pub type CodecResult<T> = std::result::Result<T, CodecError>;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("expected {expected} record(s) per frame, found {actual}")]
    RecordCount { expected: u64, actual: u64 },
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("malformed container header: {0}")]
    MalformedHeader(String),
    #[error("compression failure: {0}")]
    Compression(#[source] std::io::Error),
    #[error("record serialization failure: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("record deserialization failure: {0}")]
    Deserialize(#[source] serde_json::Error),
}
