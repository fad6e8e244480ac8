#![allow(dead_code)]
pub mod constants;

use async_trait::async_trait;

use mailproc_ingest::{CommitMode, DeliveryEvent, Ingestor, PipelineConfig};
use mailproc_store::claim::gen_claim;
use mailproc_store::record::{MetadataRecord, ProcessingStatus};
use mailproc_store::storage::in_memory::MemDb;
use mailproc_store::storage::*;

pub fn config(commit_mode: CommitMode) -> PipelineConfig {
    PipelineConfig {
        commit_mode,
        ..PipelineConfig::default()
    }
}

pub async fn pipeline(db: &MemDb, commit_mode: CommitMode) -> Ingestor {
    let builder: Builder = db.builder();
    Ingestor::new(&builder, config(commit_mode))
        .await
        .expect("in-memory store always builds")
}

/// Deposit a raw message the way the receipt rule does, return its event.
pub fn deliver(db: &MemDb, delivery_id: &str, raw: &[u8]) -> DeliveryEvent {
    let storage_key = format!("mail/{}", delivery_id);
    db.blob_insert(BlobVal::new(BlobRef(storage_key.clone()), raw.to_vec()));
    DeliveryEvent {
        storage_key,
        delivery_id: delivery_id.to_string(),
    }
}

pub fn complete_records(db: &MemDb) -> Vec<MetadataRecord> {
    db.records()
        .into_iter()
        .filter(|r| r.processing_status == ProcessingStatus::Complete)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Another invocation takes the record over right before our commit
    TakeoverBeforeCommit,
    /// The metadata table is unreachable when we commit
    CommitUnavailable,
}

/// Wraps the in-memory store to inject a failure on the commit
/// (the `Complete` put guarded by our claim).
pub struct FaultyStore {
    db: MemDb,
    inner: Store,
    fault: Fault,
}

impl FaultyStore {
    pub async fn new(db: &MemDb, fault: Fault) -> Store {
        let inner = db.builder().build().await.expect("in-memory store always builds");
        Box::new(Self {
            db: db.clone(),
            inner,
            fault,
        })
    }
}

#[async_trait]
impl IStore for FaultyStore {
    async fn blob_fetch(&self, blob_ref: &BlobRef) -> Result<BlobVal, StorageError> {
        self.inner.blob_fetch(blob_ref).await
    }

    async fn record_fetch(&self, message_id: &str) -> Result<MetadataRecord, StorageError> {
        self.inner.record_fetch(message_id).await
    }

    async fn record_put(
        &self,
        record: &MetadataRecord,
        cond: &Condition,
    ) -> Result<(), StorageError> {
        let is_commit = matches!(cond, Condition::OwnedPending(_)) && record.is_complete();
        match (is_commit, self.fault) {
            (true, Fault::CommitUnavailable) => Err(StorageError::Internal),
            (true, Fault::TakeoverBeforeCommit) => {
                let thief = record.clone().into_pending(gen_claim());
                self.db.record_overwrite(thief);
                self.inner.record_put(record, cond).await
            }
            (false, _) => self.inner.record_put(record, cond).await,
        }
    }
}
