use boreal_alert::AlertError;
use boreal_codec::CodecError;
use boreal_index::IndexError;

pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Alert(#[from] AlertError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),
    #[error("schema {0} is not registered")]
    MissingSchema(i32),
    /// The index commit failed after the blob was stored; a compensating
    /// delete was issued (its own failure is logged, never returned, so the
    /// index error stays primary). The chunk is not committed either way.
    #[error("chunk compensated after index failure on blob {uri}: {source}")]
    Compensated {
        uri: String,
        #[source]
        source: Box<ArchiveError>,
    },
}
