use std::sync::Arc;
use std::time::Duration;

use mailproc_store::claim::ClaimToken;
use mailproc_store::record::MetadataRecord;
use mailproc_store::storage::{Condition, StorageError, Store};
use mailproc_store::time::now_msec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    /// A `Complete` record already exists, nothing was written
    AlreadyComplete,
    /// Another invocation holds the record, or won the race
    ConflictRetry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Our claim was lost (taken over after its lease expired)
    ConflictRetry,
}

/// One metadata record per logical message, keyed by `MessageId`.
///
/// Every write is a single conditional put. Reads only happen after a
/// precondition failure, to tell the caller why it failed.
#[derive(Clone)]
pub struct MetadataRepository {
    store: Arc<Store>,
    claim_lease: Duration,
}

impl MetadataRepository {
    pub fn new(store: Arc<Store>, claim_lease: Duration) -> Self {
        Self { store, claim_lease }
    }

    pub async fn get_status(&self, message_id: &str) -> Result<MetadataRecord, StorageError> {
        self.store.record_fetch(message_id).await
    }

    /// Write `record` iff there is no record for its `MessageId` yet, or
    /// the existing one is `Failed`, or it is `Pending` with an expired
    /// claim.
    pub async fn put_if_absent_or_failed(
        &self,
        record: &MetadataRecord,
    ) -> Result<PutOutcome, StorageError> {
        let lease = self.claim_lease.as_millis() as u64;
        let cond = Condition::Claimable {
            stale_before: now_msec().saturating_sub(lease),
        };

        match self.store.record_put(record, &cond).await {
            Ok(()) => Ok(PutOutcome::Inserted),
            Err(StorageError::PreconditionFailed) => self.classify(&record.message_id).await,
            Err(e) => Err(e),
        }
    }

    /// Flip our `Pending` record to `Complete`.
    pub async fn commit(
        &self,
        pending: &MetadataRecord,
        claim: ClaimToken,
    ) -> Result<CommitOutcome, StorageError> {
        let complete = pending.clone().into_complete(now_msec());
        match self
            .store
            .record_put(&complete, &Condition::OwnedPending(claim))
            .await
        {
            Ok(()) => Ok(CommitOutcome::Committed),
            Err(StorageError::PreconditionFailed) => Ok(CommitOutcome::ConflictRetry),
            Err(e) => Err(e),
        }
    }

    /// Mark our `Pending` record as `Failed` so the next delivery can
    /// take it over without waiting for the lease. A no-op if we no
    /// longer own it.
    pub async fn release_failed(
        &self,
        pending: &MetadataRecord,
        claim: ClaimToken,
        reason: &str,
    ) -> Result<(), StorageError> {
        let failed = pending.clone().into_failed(reason);
        match self
            .store
            .record_put(&failed, &Condition::OwnedPending(claim))
            .await
        {
            Ok(()) | Err(StorageError::PreconditionFailed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn classify(&self, message_id: &str) -> Result<PutOutcome, StorageError> {
        match self.store.record_fetch(message_id).await {
            Ok(current) if current.is_complete() => Ok(PutOutcome::AlreadyComplete),
            Ok(current) => {
                tracing::debug!(
                    message_id = message_id,
                    status = %current.processing_status,
                    delivery_id = %current.delivery_id,
                    "record held by another delivery"
                );
                Ok(PutOutcome::ConflictRetry)
            }
            // released between our put and our read
            Err(StorageError::NotFound) => Ok(PutOutcome::ConflictRetry),
            Err(e) => Err(e),
        }
    }
}
