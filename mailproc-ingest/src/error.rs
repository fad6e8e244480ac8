use mailproc_imf::ParseError;
use mailproc_store::storage::StorageError;
use thiserror::Error;

/// Why a delivery could not be committed.
///
/// Terminal errors will fail the same way on every redelivery, retryable
/// ones are handed back to the trigger so it delivers again.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no raw message stored under {0}")]
    ObjectMissing(String),
    #[error(transparent)]
    Malformed(#[from] ParseError),
    #[error("message {0} is held by another delivery")]
    Contended(String),
    #[error("{0}")]
    StoreUnavailable(StorageError),
    #[error("unclassified failure: {0}")]
    Unclassified(#[from] anyhow::Error),
}

impl IngestError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ObjectMissing(_) | Self::Malformed(_) => false,
            Self::Contended(_) | Self::StoreUnavailable(_) | Self::Unclassified(_) => true,
        }
    }

    /// Short name used in logs and invocation reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ObjectMissing(_) => "ObjectMissing",
            Self::Malformed(_) => "Malformed",
            Self::Contended(_) => "Contended",
            Self::StoreUnavailable(_) => "StoreUnavailable",
            Self::Unclassified(_) => "Unclassified",
        }
    }
}

/// Adapters answer with raw storage errors, only `Internal` means the
/// store itself is at fault.
pub(crate) fn from_storage(e: StorageError) -> IngestError {
    match e {
        StorageError::Internal => IngestError::StoreUnavailable(e),
        other => IngestError::Unclassified(anyhow::anyhow!("unexpected storage answer: {}", other)),
    }
}
