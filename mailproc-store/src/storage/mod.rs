/*
 * This abstraction goal is to expose exactly the two primitives the
 * processor relies on, and nothing more:
 *  - reading an immutable blob by key (S3 GetObject)
 *  - a single conditional write of a metadata record (DynamoDB PutItem
 *    with a condition expression)
 *
 * The conditional write is the only synchronization point between
 * invocations: backends must evaluate the condition and apply the write
 * atomically, never as a read followed by a write.
 */

pub mod attrs;
pub mod aws;
pub mod in_memory;

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;

use crate::claim::ClaimToken;
use crate::record::{MetadataRecord, ProcessingStatus};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobRef(pub String);
impl std::fmt::Display for BlobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "BlobRef({})", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct BlobVal {
    pub blob_ref: BlobRef,
    pub meta: HashMap<String, String>,
    pub value: Vec<u8>,
}
impl BlobVal {
    pub fn new(blob_ref: BlobRef, value: Vec<u8>) -> Self {
        Self {
            blob_ref,
            value,
            meta: HashMap::new(),
        }
    }

    pub fn with_meta(mut self, k: String, v: String) -> Self {
        self.meta.insert(k, v);
        self
    }

    pub fn get_meta(&self, k: &str) -> Option<&str> {
        self.meta.get(k).map(String::as_str)
    }
}

/// Precondition of a metadata write, evaluated by the backend
/// atomically with the write itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// No record yet, or a `Failed` record, or a `Pending` record
    /// claimed strictly before `stale_before` (ms since epoch).
    Claimable { stale_before: u64 },
    /// A `Pending` record still owned by this claim.
    OwnedPending(ClaimToken),
}

impl Condition {
    /// Reference semantics of the condition, used by the in-memory backend.
    /// The DynamoDB backend encodes the same predicate as a condition
    /// expression (see `attrs::condition_expression`).
    pub fn holds_for(&self, current: Option<&MetadataRecord>) -> bool {
        match (self, current) {
            (Self::Claimable { .. }, None) => true,
            (Self::Claimable { stale_before }, Some(rec)) => match rec.processing_status {
                ProcessingStatus::Failed => true,
                // no lease start: nobody can be holding it
                ProcessingStatus::Pending => rec
                    .claimed_at
                    .map(|at| at < *stale_before)
                    .unwrap_or(true),
                ProcessingStatus::Complete => false,
            },
            (Self::OwnedPending(_), None) => false,
            (Self::OwnedPending(claim), Some(rec)) => {
                rec.processing_status == ProcessingStatus::Pending
                    && rec.claim_token.as_ref() == Some(claim)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    NotFound,
    PreconditionFailed,
    Internal,
}
impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("Storage Error: ")?;
        match self {
            Self::NotFound => f.write_str("Item not found"),
            Self::PreconditionFailed => f.write_str("Write precondition does not hold"),
            Self::Internal => f.write_str("An internal error occured"),
        }
    }
}
impl std::error::Error for StorageError {}

#[async_trait]
pub trait IStore {
    async fn blob_fetch(&self, blob_ref: &BlobRef) -> Result<BlobVal, StorageError>;

    /// Strongly consistent read of the record stored under `message_id`.
    async fn record_fetch(&self, message_id: &str) -> Result<MetadataRecord, StorageError>;
    /// Replace the record stored under `record.message_id` iff `cond` holds,
    /// otherwise fail with `StorageError::PreconditionFailed`.
    async fn record_put(
        &self,
        record: &MetadataRecord,
        cond: &Condition,
    ) -> Result<(), StorageError>;
}
pub type Store = Box<dyn IStore + Send + Sync>;

#[async_trait]
pub trait IBuilder: std::fmt::Debug {
    async fn build(&self) -> Result<Store, StorageError>;
}
pub type Builder = Arc<dyn IBuilder + Send + Sync>;
