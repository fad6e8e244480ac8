//! Mapping between `MetadataRecord` and DynamoDB items.
//!
//! Lists are stored as `L` rather than `SS` because recipient order
//! matters and string sets cannot be empty.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, Utc};

use super::Condition;
use crate::claim::ClaimToken;
use crate::record::{MetadataRecord, ProcessingStatus, PARTITION_KEY};

pub const FALLBACK_ID: &str = "FallbackId";
pub const FROM: &str = "From";
pub const TO: &str = "To";
pub const CC: &str = "Cc";
pub const SUBJECT: &str = "Subject";
pub const RECEIVED_AT: &str = "ReceivedAt";
pub const SIZE_BYTES: &str = "SizeBytes";
pub const HAS_ATTACHMENTS: &str = "HasAttachments";
pub const STORAGE_KEY: &str = "StorageKey";
pub const PROCESSING_STATUS: &str = "ProcessingStatus";
pub const PROCESSED_AT: &str = "ProcessedAt";
pub const CLAIM_TOKEN: &str = "ClaimToken";
pub const CLAIMED_AT: &str = "ClaimedAt";
pub const DELIVERY_ID: &str = "DeliveryId";
pub const FAILURE_REASON: &str = "FailureReason";

pub type Item = HashMap<String, AttributeValue>;

pub fn record_to_item(record: &MetadataRecord) -> Item {
    let mut item = Item::new();
    item.insert(
        PARTITION_KEY.into(),
        AttributeValue::S(record.message_id.clone()),
    );
    item.insert(FALLBACK_ID.into(), AttributeValue::Bool(record.fallback_id));
    item.insert(FROM.into(), AttributeValue::S(record.from.clone()));
    item.insert(TO.into(), string_list(&record.to));
    item.insert(CC.into(), string_list(&record.cc));
    item.insert(SUBJECT.into(), AttributeValue::S(record.subject.clone()));
    if let Some(at) = &record.received_at {
        item.insert(RECEIVED_AT.into(), AttributeValue::S(at.to_rfc3339()));
    }
    item.insert(
        SIZE_BYTES.into(),
        AttributeValue::N(record.size_bytes.to_string()),
    );
    item.insert(
        HAS_ATTACHMENTS.into(),
        AttributeValue::Bool(record.has_attachments),
    );
    item.insert(
        STORAGE_KEY.into(),
        AttributeValue::S(record.storage_key.clone()),
    );
    item.insert(
        PROCESSING_STATUS.into(),
        AttributeValue::S(record.processing_status.as_str().into()),
    );
    if let Some(at) = record.processed_at {
        item.insert(PROCESSED_AT.into(), AttributeValue::N(at.to_string()));
    }
    if let Some(claim) = &record.claim_token {
        item.insert(CLAIM_TOKEN.into(), AttributeValue::S(claim.to_string()));
    }
    if let Some(at) = record.claimed_at {
        item.insert(CLAIMED_AT.into(), AttributeValue::N(at.to_string()));
    }
    item.insert(
        DELIVERY_ID.into(),
        AttributeValue::S(record.delivery_id.clone()),
    );
    if let Some(reason) = &record.failure_reason {
        item.insert(FAILURE_REASON.into(), AttributeValue::S(reason.clone()));
    }
    item
}

pub fn record_from_item(item: &Item) -> Result<MetadataRecord> {
    let received_at = opt_s(item, RECEIVED_AT)?
        .map(|v| DateTime::parse_from_rfc3339(v).map(|d| d.with_timezone(&Utc)))
        .transpose()?;
    let processing_status = req_s(item, PROCESSING_STATUS)?
        .parse::<ProcessingStatus>()
        .map_err(|e| anyhow!(e))?;
    let claim_token = opt_s(item, CLAIM_TOKEN)?
        .map(|v| {
            v.parse::<ClaimToken>()
                .map_err(|e| anyhow!("bad claim token: {}", e))
        })
        .transpose()?;

    Ok(MetadataRecord {
        message_id: req_s(item, PARTITION_KEY)?.to_string(),
        fallback_id: opt_bool(item, FALLBACK_ID)?.unwrap_or(false),
        from: opt_s(item, FROM)?.unwrap_or_default().to_string(),
        to: opt_string_list(item, TO)?,
        cc: opt_string_list(item, CC)?,
        subject: opt_s(item, SUBJECT)?.unwrap_or_default().to_string(),
        received_at,
        size_bytes: opt_n(item, SIZE_BYTES)?.unwrap_or(0),
        has_attachments: opt_bool(item, HAS_ATTACHMENTS)?.unwrap_or(false),
        storage_key: opt_s(item, STORAGE_KEY)?.unwrap_or_default().to_string(),
        processing_status,
        processed_at: opt_n(item, PROCESSED_AT)?,
        claim_token,
        claimed_at: opt_n(item, CLAIMED_AT)?,
        delivery_id: opt_s(item, DELIVERY_ID)?.unwrap_or_default().to_string(),
        failure_reason: opt_s(item, FAILURE_REASON)?.map(str::to_string),
    })
}

/// A condition expression with its placeholders. DynamoDB rejects
/// placeholders that the expression does not use, so each condition
/// only carries its own.
#[derive(Debug, Clone)]
pub struct ConditionExpr {
    pub expression: String,
    pub names: HashMap<String, String>,
    pub values: HashMap<String, AttributeValue>,
}

pub fn condition_expression(cond: &Condition) -> ConditionExpr {
    let mut names = HashMap::new();
    let mut values = HashMap::new();
    names.insert("#st".to_string(), PROCESSING_STATUS.to_string());
    values.insert(
        ":pending".to_string(),
        AttributeValue::S(ProcessingStatus::Pending.as_str().into()),
    );

    let expression = match cond {
        Condition::Claimable { stale_before } => {
            names.insert("#pk".to_string(), PARTITION_KEY.to_string());
            names.insert("#ca".to_string(), CLAIMED_AT.to_string());
            values.insert(
                ":failed".to_string(),
                AttributeValue::S(ProcessingStatus::Failed.as_str().into()),
            );
            values.insert(
                ":stale".to_string(),
                AttributeValue::N(stale_before.to_string()),
            );
            "attribute_not_exists(#pk) OR #st = :failed \
             OR (#st = :pending AND (attribute_not_exists(#ca) OR #ca < :stale))"
                .to_string()
        }
        Condition::OwnedPending(claim) => {
            names.insert("#ct".to_string(), CLAIM_TOKEN.to_string());
            values.insert(":claim".to_string(), AttributeValue::S(claim.to_string()));
            "#st = :pending AND #ct = :claim".to_string()
        }
    };

    ConditionExpr {
        expression,
        names,
        values,
    }
}

// ---- helpers

fn string_list(list: &[String]) -> AttributeValue {
    AttributeValue::L(list.iter().cloned().map(AttributeValue::S).collect())
}

fn req_s<'a>(item: &'a Item, name: &str) -> Result<&'a str> {
    opt_s(item, name)?.ok_or(anyhow!("missing attribute {}", name))
}

fn opt_s<'a>(item: &'a Item, name: &str) -> Result<Option<&'a str>> {
    match item.get(name) {
        None | Some(AttributeValue::Null(_)) => Ok(None),
        Some(AttributeValue::S(v)) => Ok(Some(v.as_str())),
        Some(_) => bail!("attribute {} is not a string", name),
    }
}

fn opt_n(item: &Item, name: &str) -> Result<Option<u64>> {
    match item.get(name) {
        None | Some(AttributeValue::Null(_)) => Ok(None),
        Some(AttributeValue::N(v)) => Ok(Some(v.parse()?)),
        Some(_) => bail!("attribute {} is not a number", name),
    }
}

fn opt_bool(item: &Item, name: &str) -> Result<Option<bool>> {
    match item.get(name) {
        None | Some(AttributeValue::Null(_)) => Ok(None),
        Some(AttributeValue::Bool(v)) => Ok(Some(*v)),
        Some(_) => bail!("attribute {} is not a boolean", name),
    }
}

fn opt_string_list(item: &Item, name: &str) -> Result<Vec<String>> {
    match item.get(name) {
        None | Some(AttributeValue::Null(_)) => Ok(vec![]),
        Some(AttributeValue::L(list)) => list
            .iter()
            .map(|v| match v {
                AttributeValue::S(s) => Ok(s.clone()),
                _ => Err(anyhow!("attribute {} contains a non string entry", name)),
            })
            .collect(),
        Some(AttributeValue::Ss(set)) => Ok(set.clone()),
        Some(_) => bail!("attribute {} is not a list", name),
    }
}
