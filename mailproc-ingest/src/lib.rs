pub mod error;
pub mod ingest;
pub mod message_store;
pub mod repository;

pub use error::IngestError;
pub use ingest::{
    CommitMode, DeliveryEvent, IngestOutcome, IngestState, Ingestor, PipelineConfig,
    DEFAULT_CLAIM_LEASE,
};
