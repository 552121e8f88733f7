use boreal_alert::AlertError;
use boreal_archive::ArchiveError;
use boreal_codec::CodecError;
use boreal_index::IndexError;

pub type ExportResult<T> = std::result::Result<T, ExportError>;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Alert(#[from] AlertError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}
