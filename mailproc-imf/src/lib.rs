//! Extract delivery metadata from a raw Internet Message (RFC 5322).
//!
//! This is not a full MIME parser: we only read what is needed to index a
//! message, and every step is bounded so a corrupted or hostile input can
//! not make the scan unbounded.
//!
//! ## What is read
//!
//! ```text
//! Received: from mx ... ; Sat, 8 Jul 2023 07:14:29 +0200   -> ReceivedAt
//! Message-ID: <abc@x>                                       -> MessageId
//! From: Alice <a@x>                                         -> From
//! To: b@x, "Carol" <c@x>                                    -> To
//! Cc: d@x                                                   -> Cc
//! Subject: =?utf-8?q?Caf=C3=A9?=                            -> Subject
//! Content-Type: multipart/mixed; boundary="sep"             -> HasAttachments
//! ```
//!
//! ## RFC References
//!
//! Internet Message Format - https://datatracker.ietf.org/doc/html/rfc5322
//! MIME Part One (Content-Type) - https://datatracker.ietf.org/doc/html/rfc2045
//! MIME Part Three (encoded-words) - https://datatracker.ietf.org/doc/html/rfc2047
//! Content-Disposition - https://datatracker.ietf.org/doc/html/rfc2183

pub mod address;
pub mod encoding;
pub mod header;
pub mod ident;
pub mod message;
pub mod mime;

pub use header::DEFAULT_MAX_HEADER_BYTES;
pub use message::{MessageIdSource, MessageParser, ParseError, ParsedMessage};
