use boreal_archive::ArchiveError;

use crate::consumer::BrokerError;

pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Errors that terminate the ingest loop. Both kinds leave the committed
/// offsets behind the flushed chunks, so a restart replays idempotently.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}
