use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::claim::ClaimToken;

/// Name of the partition key of the metadata table
pub const PARTITION_KEY: &str = "MessageId";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessingStatus {
    /// Claimed by an invocation that has not finished yet (or crashed)
    Pending,
    /// Terminal, content fields are frozen
    Complete,
    /// Left for operators, may be superseded by a later delivery
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Complete" => Ok(Self::Complete),
            "Failed" => Ok(Self::Failed),
            other => Err(format!("unknown processing status {:?}", other)),
        }
    }
}

/// The durable metadata of one logical message, keyed by `MessageId`.
///
/// Field names are serialized the same way they are named in the
/// metadata table, so `mailproc status` output can be compared
/// with what an operator sees in the console.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetadataRecord {
    pub message_id: String,
    /// `true` when `message_id` was derived because the message had no usable Message-Id
    pub fallback_id: bool,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub received_at: Option<DateTime<Utc>>,
    pub size_bytes: u64,
    pub has_attachments: bool,
    pub storage_key: String,

    pub processing_status: ProcessingStatus,
    /// ms since epoch, set when the record reaches `Complete`
    pub processed_at: Option<u64>,
    pub claim_token: Option<ClaimToken>,
    /// ms since epoch
    pub claimed_at: Option<u64>,
    pub delivery_id: String,
    pub failure_reason: Option<String>,
}

impl MetadataRecord {
    /// Compare only what was extracted from the message itself,
    /// ignoring the bookkeeping of the invocation that wrote it.
    pub fn same_content(&self, other: &MetadataRecord) -> bool {
        self.message_id == other.message_id
            && self.fallback_id == other.fallback_id
            && self.from == other.from
            && self.to == other.to
            && self.cc == other.cc
            && self.subject == other.subject
            && self.received_at == other.received_at
            && self.size_bytes == other.size_bytes
            && self.has_attachments == other.has_attachments
    }

    pub fn is_complete(&self) -> bool {
        self.processing_status == ProcessingStatus::Complete
    }

    /// A record owned by `claim`, waiting for its commit.
    pub fn into_pending(mut self, claim: ClaimToken) -> Self {
        self.processing_status = ProcessingStatus::Pending;
        self.processed_at = None;
        self.claim_token = Some(claim);
        self.claimed_at = Some(claim.claimed_at);
        self.failure_reason = None;
        self
    }

    pub fn into_complete(mut self, now: u64) -> Self {
        self.processing_status = ProcessingStatus::Complete;
        self.processed_at = Some(now);
        self.claim_token = None;
        self.failure_reason = None;
        self
    }

    pub fn into_failed(mut self, reason: &str) -> Self {
        self.processing_status = ProcessingStatus::Failed;
        self.processed_at = None;
        self.claim_token = None;
        self.failure_reason = Some(reason.to_string());
        self
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::record;
    use super::*;

    #[test]
    fn status_text_form() {
        for st in [
            ProcessingStatus::Pending,
            ProcessingStatus::Complete,
            ProcessingStatus::Failed,
        ] {
            assert_eq!(st.as_str().parse::<ProcessingStatus>(), Ok(st));
        }
        assert!("complete".parse::<ProcessingStatus>().is_err());
    }

    #[test]
    fn transitions_keep_content() {
        let base = record("abc@x");
        let claim = ClaimToken::issued_at(42);

        let pending = base.clone().into_pending(claim);
        assert_eq!(pending.processing_status, ProcessingStatus::Pending);
        assert_eq!(pending.claim_token, Some(claim));
        assert_eq!(pending.claimed_at, Some(42));
        assert_eq!(pending.processed_at, None);
        assert!(pending.same_content(&base));

        let complete = pending.clone().into_complete(50);
        assert!(complete.is_complete());
        assert_eq!(complete.claim_token, None);
        assert_eq!(complete.processed_at, Some(50));

        let failed = pending.into_failed("commit failed");
        assert_eq!(failed.processing_status, ProcessingStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("commit failed"));
        assert!(failed.same_content(&base));
    }
}
