use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use mailproc_imf::{MessageIdSource, MessageParser, ParsedMessage, DEFAULT_MAX_HEADER_BYTES};
use mailproc_store::claim::{gen_claim, ClaimToken};
use mailproc_store::record::{MetadataRecord, ProcessingStatus};
use mailproc_store::storage::{Builder, StorageError, Store};
use mailproc_store::time::now_msec;

use crate::error::{from_storage, IngestError};
use crate::message_store::MessageStore;
use crate::repository::{CommitOutcome, MetadataRepository, PutOutcome};

/// A Lambda invocation can not outlive 15 minutes, a claim older than
/// that belongs to a dead invocation.
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// The record is written `Complete` by the conditional put itself
    #[default]
    Atomic,
    /// `Pending` first, then `Complete` if we still own the claim
    TwoPhase,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_header_bytes: usize,
    pub claim_lease: Duration,
    pub commit_mode: CommitMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            claim_lease: DEFAULT_CLAIM_LEASE,
            commit_mode: CommitMode::default(),
        }
    }
}

/// One trigger invocation for one raw object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub storage_key: String,
    /// Only used to correlate logs and records
    pub delivery_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Committed { message_id: String },
    /// Another delivery already committed this message
    Duplicate { message_id: String },
}

impl IngestOutcome {
    pub fn message_id(&self) -> &str {
        match self {
            Self::Committed { message_id } | Self::Duplicate { message_id } => message_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Start,
    Fetched,
    Parsed,
    Reserved,
    Committed,
    Failed,
}

impl std::fmt::Display for IngestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Fetched => "fetched",
            Self::Parsed => "parsed",
            Self::Reserved => "reserved",
            Self::Committed => "committed",
            Self::Failed => "failed",
        })
    }
}

/// Drives one delivery from the raw object to a committed metadata record.
///
/// Holds no state between deliveries: two `Ingestor`s over the same
/// backend, or the same one called concurrently, only synchronize through
/// the conditional writes of the repository.
#[derive(Clone)]
pub struct Ingestor {
    messages: MessageStore,
    repository: MetadataRepository,
    parser: MessageParser,
    commit_mode: CommitMode,
}

impl Ingestor {
    pub async fn new(builder: &Builder, config: PipelineConfig) -> Result<Self, StorageError> {
        let store = builder.build().await?;
        Ok(Self::from_store(store, config))
    }

    pub fn from_store(store: Store, config: PipelineConfig) -> Self {
        let store = Arc::new(store);
        Self {
            messages: MessageStore::new(store.clone()),
            repository: MetadataRepository::new(store, config.claim_lease),
            parser: MessageParser::new(config.max_header_bytes),
            commit_mode: config.commit_mode,
        }
    }

    pub fn repository(&self) -> &MetadataRepository {
        &self.repository
    }

    pub async fn ingest(&self, event: &DeliveryEvent) -> Result<IngestOutcome, IngestError> {
        let span = tracing::info_span!(
            "ingest",
            storage_key = %event.storage_key,
            delivery_id = %event.delivery_id
        );

        async move {
            tracing::debug!(state = %IngestState::Start);
            let res = self.run(event).await;
            match &res {
                Ok(IngestOutcome::Committed { message_id }) => {
                    tracing::info!(state = %IngestState::Committed, message_id = %message_id, "metadata committed")
                }
                Ok(IngestOutcome::Duplicate { message_id }) => {
                    tracing::info!(state = %IngestState::Committed, message_id = %message_id, "already committed, nothing to do")
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(state = %IngestState::Failed, reason = e.kind(), "delivery will be retried: {}", e)
                }
                Err(e) => {
                    tracing::error!(state = %IngestState::Failed, reason = e.kind(), "delivery dropped: {}", e)
                }
            }
            res
        }
        .instrument(span)
        .await
    }

    async fn run(&self, event: &DeliveryEvent) -> Result<IngestOutcome, IngestError> {
        let raw = match self.messages.fetch(&event.storage_key).await {
            Ok(raw) => raw,
            Err(StorageError::NotFound) => {
                return Err(IngestError::ObjectMissing(event.storage_key.clone()))
            }
            Err(e) => return Err(from_storage(e)),
        };
        tracing::debug!(state = %IngestState::Fetched, size = raw.size());

        let parsed = self.parser.parse(&raw.content, &event.storage_key)?;
        tracing::debug!(
            state = %IngestState::Parsed,
            message_id = %parsed.message_id,
            has_attachments = parsed.has_attachments
        );

        let claim = gen_claim();
        let pending = pending_record(parsed, &event.delivery_id, claim);
        let message_id = pending.message_id.clone();

        match self.commit_mode {
            CommitMode::Atomic => {
                let complete = pending.into_complete(now_msec());
                match self.reserve(&complete).await? {
                    PutOutcome::Inserted => Ok(IngestOutcome::Committed { message_id }),
                    PutOutcome::AlreadyComplete => Ok(IngestOutcome::Duplicate { message_id }),
                    PutOutcome::ConflictRetry => Err(IngestError::Contended(message_id)),
                }
            }
            CommitMode::TwoPhase => {
                match self.reserve(&pending).await? {
                    PutOutcome::Inserted => {
                        tracing::debug!(state = %IngestState::Reserved, message_id = %message_id, claim = %claim)
                    }
                    PutOutcome::AlreadyComplete => {
                        return Ok(IngestOutcome::Duplicate { message_id })
                    }
                    PutOutcome::ConflictRetry => return Err(IngestError::Contended(message_id)),
                }

                match self.repository.commit(&pending, claim).await {
                    Ok(CommitOutcome::Committed) => Ok(IngestOutcome::Committed { message_id }),
                    Ok(CommitOutcome::ConflictRetry) => {
                        tracing::warn!(message_id = %message_id, "claim lost before commit");
                        Err(IngestError::Contended(message_id))
                    }
                    Err(e) => {
                        let reason = format!("commit failed: {}", e);
                        if let Err(release) =
                            self.repository.release_failed(&pending, claim, &reason).await
                        {
                            tracing::warn!(
                                message_id = %message_id,
                                "unable to release the claim, it will expire: {}",
                                release
                            );
                        }
                        Err(from_storage(e))
                    }
                }
            }
        }
    }

    async fn reserve(&self, record: &MetadataRecord) -> Result<PutOutcome, IngestError> {
        self.repository
            .put_if_absent_or_failed(record)
            .await
            .map_err(from_storage)
    }
}

fn pending_record(
    parsed: ParsedMessage,
    delivery_id: &str,
    claim: ClaimToken,
) -> MetadataRecord {
    MetadataRecord {
        message_id: parsed.message_id,
        fallback_id: parsed.message_id_source == MessageIdSource::Fallback,
        from: parsed.from,
        to: parsed.to,
        cc: parsed.cc,
        subject: parsed.subject,
        received_at: parsed.received_at,
        size_bytes: parsed.size_bytes,
        has_attachments: parsed.has_attachments,
        storage_key: parsed.storage_key,
        processing_status: ProcessingStatus::Pending,
        processed_at: None,
        claim_token: Some(claim),
        claimed_at: Some(claim.claimed_at),
        delivery_id: delivery_id.to_string(),
        failure_reason: None,
    }
}
