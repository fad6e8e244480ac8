use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::address::strip_comments;

pub const FALLBACK_PREFIX: &str = "fallback-";

/// Normalize a `Message-ID` header value: keep the first msg-id, without
/// its angle brackets and surrounding white space. Comments may appear
/// anywhere around it. A bare token is only accepted when there is no
/// `<...>` at all.
pub fn normalize_message_id(value: &str) -> Option<String> {
    let value = strip_comments(value);
    let id = match value.split_once('<') {
        Some((_, rest)) => rest.split('>').next().unwrap_or(rest),
        None => value.split_whitespace().next().unwrap_or(""),
    };
    let id = id.trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Deterministic identifier for messages without a usable `Message-ID`.
///
/// Derived from the sender, the sorted recipient set, the raw size and the
/// received timestamp truncated to the second (0 when unknown). Identical
/// inputs always give the same identifier, whatever the recipient order.
pub fn fallback_message_id(
    from: &str,
    recipients: &[String],
    size_bytes: u64,
    received_at: Option<DateTime<Utc>>,
) -> String {
    let mut sorted = recipients.to_vec();
    sorted.sort();

    let mut hasher = Sha256::new();
    hasher.update(from.as_bytes());
    hasher.update(b"\n");
    for rcpt in sorted.iter() {
        hasher.update(rcpt.as_bytes());
        hasher.update(b",");
    }
    hasher.update(b"\n");
    hasher.update(size_bytes.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(received_at.map(|t| t.timestamp()).unwrap_or(0).to_string().as_bytes());
    let digest = hasher.finalize();

    format!("{}{}", FALLBACK_PREFIX, hex::encode(&digest[..16]))
}
