use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::address::{address_list, first_address};
use crate::encoding::decode_words;
use crate::header::{parse_headers, split_header_body, Headers, DEFAULT_MAX_HEADER_BYTES};
use crate::ident::{fallback_message_id, normalize_message_id};
use crate::mime::has_attachments;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageIdSource {
    /// Taken from the `Message-ID` header
    Header,
    /// Derived from the message content
    Fallback,
}

/// What we know about a raw message after parsing it.
/// Recomputed from the bytes on every delivery, never stored as is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParsedMessage {
    pub message_id: String,
    pub message_id_source: MessageIdSource,
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub received_at: Option<DateTime<Utc>>,
    pub size_bytes: u64,
    pub has_attachments: bool,
    pub storage_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed message: no end of header block within the first {0} bytes")]
    Malformed(usize),
}

#[derive(Debug, Clone)]
pub struct MessageParser {
    max_header_bytes: usize,
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEADER_BYTES)
    }
}

impl MessageParser {
    pub fn new(max_header_bytes: usize) -> Self {
        Self { max_header_bytes }
    }

    pub fn max_header_bytes(&self) -> usize {
        self.max_header_bytes
    }

    /// Extract the metadata of `raw`, stored under `storage_key`.
    ///
    /// The only hard failure is a header block that does not end within
    /// `max_header_bytes`: everything else degrades to empty values.
    pub fn parse(&self, raw: &[u8], storage_key: &str) -> Result<ParsedMessage, ParseError> {
        let (block, body) = split_header_body(raw, self.max_header_bytes)
            .ok_or(ParseError::Malformed(self.max_header_bytes))?;
        let headers = parse_headers(block);

        let from = headers
            .first("From")
            .and_then(first_address)
            .unwrap_or_default();
        let to = list_of(&headers, "To");
        let cc = list_of(&headers, "Cc");
        let subject = headers
            .first("Subject")
            .map(decode_words)
            .unwrap_or_default();
        let received_at = received_at(&headers);
        let size_bytes = raw.len() as u64;
        let has_attachments = has_attachments(&headers, body, self.max_header_bytes);

        let (message_id, message_id_source) =
            match headers.first("Message-ID").and_then(normalize_message_id) {
                Some(id) => (id, MessageIdSource::Header),
                None => {
                    let recipients = to.iter().chain(cc.iter()).cloned().collect::<Vec<_>>();
                    let id = fallback_message_id(&from, &recipients, size_bytes, received_at);
                    tracing::debug!(
                        storage_key = storage_key,
                        message_id = %id,
                        "no Message-ID header, using a derived id"
                    );
                    (id, MessageIdSource::Fallback)
                }
            };

        Ok(ParsedMessage {
            message_id,
            message_id_source,
            from,
            to,
            cc,
            subject,
            received_at,
            size_bytes,
            has_attachments,
            storage_key: storage_key.to_string(),
        })
    }
}

/// `To` and `Cc` may appear once, a repeated field is ignored.
fn list_of(headers: &Headers, name: &str) -> Vec<String> {
    headers.first(name).map(address_list).unwrap_or_default()
}

/// The date stamped by the first (most recent) relay, else the
/// originator's `Date`.
fn received_at(headers: &Headers) -> Option<DateTime<Utc>> {
    headers
        .first("Received")
        .and_then(|v| v.rsplit_once(';'))
        .and_then(|(_, date)| rfc2822(date))
        .or_else(|| headers.first("Date").and_then(rfc2822))
}

fn rfc2822(value: &str) -> Option<DateTime<Utc>> {
    let mut value = value.trim();
    // trailing zone comment: "+0200 (CEST)"
    if value.ends_with(')') {
        if let Some(open) = value.rfind('(') {
            value = value[..open].trim_end();
        }
    }
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
