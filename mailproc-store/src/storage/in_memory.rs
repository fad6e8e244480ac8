use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::record::MetadataRecord;
use crate::storage::*;

/// In-memory object store and metadata table.
///
/// Clones share the same data, so a test can keep a `MemDb` around to
/// seed blobs and inspect records while the pipeline works on a `Store`
/// built from it.
#[derive(Clone, Debug, Default)]
pub struct MemDb {
    blobs: Arc<RwLock<HashMap<String, BlobVal>>>,
    records: Arc<RwLock<HashMap<String, MetadataRecord>>>,
}

impl MemDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder(&self) -> Arc<MemBuilder> {
        Arc::new(MemBuilder { db: self.clone() })
    }

    /// Deposit a blob, the way the inbound MTA would.
    pub fn blob_insert(&self, blob_val: BlobVal) {
        tracing::trace!(entry=%blob_val.blob_ref, command="blob_insert");
        let mut blobs = self.blobs.write().unwrap_or_else(|e| e.into_inner());
        blobs.insert(blob_val.blob_ref.0.clone(), blob_val);
    }

    /// Write a record unconditionally, to set up a table state.
    pub fn record_overwrite(&self, record: MetadataRecord) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(record.message_id.clone(), record);
    }

    /// Snapshot of every record, sorted by `MessageId`.
    pub fn records(&self) -> Vec<MetadataRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut all = records.values().cloned().collect::<Vec<_>>();
        all.sort_by(|a, b| a.message_id.cmp(&b.message_id));
        all
    }
}

#[derive(Clone, Debug)]
pub struct MemBuilder {
    db: MemDb,
}

#[async_trait]
impl IBuilder for MemBuilder {
    async fn build(&self) -> Result<Store, StorageError> {
        Ok(Box::new(MemStore {
            db: self.db.clone(),
        }))
    }
}

pub struct MemStore {
    db: MemDb,
}

#[async_trait]
impl IStore for MemStore {
    async fn blob_fetch(&self, blob_ref: &BlobRef) -> Result<BlobVal, StorageError> {
        tracing::trace!(entry=%blob_ref, command="blob_fetch");
        let blobs = self.db.blobs.read().or(Err(StorageError::Internal))?;
        blobs
            .get(&blob_ref.0)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn record_fetch(&self, message_id: &str) -> Result<MetadataRecord, StorageError> {
        tracing::trace!(message_id = message_id, command = "record_fetch");
        let records = self.db.records.read().or(Err(StorageError::Internal))?;
        records
            .get(message_id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn record_put(
        &self,
        record: &MetadataRecord,
        cond: &Condition,
    ) -> Result<(), StorageError> {
        tracing::trace!(message_id=%record.message_id, condition=?cond, command="record_put");
        // The write lock is held across check and write: this is the CAS.
        let mut records = self.db.records.write().or(Err(StorageError::Internal))?;
        if !cond.holds_for(records.get(&record.message_id)) {
            return Err(StorageError::PreconditionFailed);
        }
        records.insert(record.message_id.clone(), record.clone());
        Ok(())
    }
}
