use std::collections::HashMap;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while1},
    character::complete::{char, multispace0},
    combinator::opt,
    multi::many0,
    sequence::{delimited, preceded, separated_pair, terminated, tuple},
    IResult,
};

use crate::header::{parse_headers, split_header_body, Headers};

/// Multiparts nested deeper than this are not inspected.
pub const MAX_MULTIPART_DEPTH: usize = 8;

/// A parsed `Content-Type` value: `type/subtype` lowercased,
/// parameter names lowercased, parameter values verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    pub mime_type: String,
    pub params: HashMap<String, String>,
}

impl ContentType {
    pub fn is_multipart(&self) -> bool {
        self.mime_type.starts_with("multipart/")
    }

    pub fn boundary(&self) -> Option<&str> {
        self.params
            .get("boundary")
            .map(String::as_str)
            .filter(|b| !b.is_empty())
    }
}

pub fn content_type(value: &str) -> Option<ContentType> {
    match content_type_value(value) {
        Ok((_, (ty, sub, params))) => Some(ContentType {
            mime_type: format!("{}/{}", ty, sub).to_ascii_lowercase(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                .collect(),
        }),
        Err(_) => None,
    }
}

/// The disposition type of a `Content-Disposition` value, lowercased.
pub fn disposition_type(value: &str) -> Option<String> {
    let kind = value.split(';').next()?.trim();
    if kind.is_empty() {
        None
    } else {
        Some(kind.to_ascii_lowercase())
    }
}

/// Whether any sub-part of a multipart entity is declared with an
/// `attachment` disposition. Non multipart entities have none.
///
/// Sub-part header blocks are bounded by `max_header_bytes` like the
/// top-level one, nested multiparts are followed up to
/// `MAX_MULTIPART_DEPTH` levels.
pub fn has_attachments(headers: &Headers, body: &[u8], max_header_bytes: usize) -> bool {
    scan_entity(headers, body, max_header_bytes, 0)
}

fn scan_entity(headers: &Headers, body: &[u8], limit: usize, depth: usize) -> bool {
    let ctype = match headers.first("Content-Type").and_then(content_type) {
        Some(ct) if ct.is_multipart() => ct,
        _ => return false,
    };
    let boundary = match ctype.boundary() {
        Some(b) => b,
        None => {
            tracing::debug!(mime_type = %ctype.mime_type, "multipart without boundary");
            return false;
        }
    };

    for part in split_parts(body, boundary) {
        let (block, part_body) = match split_header_body(part, limit) {
            Some(split) => split,
            // a part made only of headers
            None if part.len() <= limit => (part, &b""[..]),
            None => continue,
        };
        let part_headers = parse_headers(block);

        let is_attachment = part_headers
            .first("Content-Disposition")
            .and_then(disposition_type)
            .map(|kind| kind == "attachment")
            .unwrap_or(false);
        if is_attachment {
            return true;
        }

        if depth + 1 < MAX_MULTIPART_DEPTH
            && scan_entity(&part_headers, part_body, limit, depth + 1)
        {
            return true;
        }
    }
    false
}

/// Cut a multipart body into its parts. The preamble and epilogue are
/// ignored, an unterminated last part is still returned.
fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{}", boundary);
    let mut parts = vec![];
    let mut current: Option<usize> = None;
    let mut pos = 0;

    while pos < body.len() {
        let line_end = body[pos..]
            .iter()
            .position(|c| *c == b'\n')
            .map(|p| pos + p + 1)
            .unwrap_or(body.len());
        let line = &body[pos..line_end];

        if let Some(rest) = line.strip_prefix(delimiter.as_bytes()) {
            let (closing, rest) = match rest.strip_prefix(b"--") {
                Some(rest) => (true, rest),
                None => (false, rest),
            };
            // transport padding only, otherwise a longer boundary
            if rest.iter().all(|c| b" \t\r\n".contains(c)) {
                if let Some(start) = current {
                    parts.push(&body[start..pos]);
                }
                if closing {
                    return parts;
                }
                current = Some(line_end);
            }
        }
        pos = line_end;
    }

    if let Some(start) = current {
        if start < body.len() {
            parts.push(&body[start..]);
        }
    }
    parts
}

// ---- Content-Type grammar (RFC 2045 §5.1), lenient on white space

fn is_token_char(c: char) -> bool {
    c.is_ascii() && !c.is_ascii_control() && !" ()<>@,;:\\\"/[]?=".contains(c)
}

fn token<'a>(input: &'a str) -> IResult<&'a str, &'a str> {
    take_while1(is_token_char)(input)
}

fn quoted_string<'a>(input: &'a str) -> IResult<&'a str, &'a str> {
    delimited(char('"'), take_till(|c: char| c == '"'), char('"'))(input)
}

fn parameter<'a>(input: &'a str) -> IResult<&'a str, (&'a str, &'a str)> {
    preceded(
        tuple((multispace0, char(';'), multispace0)),
        separated_pair(
            token,
            tuple((multispace0, char('='), multispace0)),
            alt((quoted_string, token)),
        ),
    )(input)
}

fn content_type_value<'a>(
    input: &'a str,
) -> IResult<&'a str, (&'a str, &'a str, Vec<(&'a str, &'a str)>)> {
    let (input, (_, ty, _, sub, params, _)) = tuple((
        multispace0,
        token,
        tag("/"),
        token,
        many0(parameter),
        opt(terminated(multispace0, char(';'))),
    ))(input)?;
    Ok((input, (ty, sub, params)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::DEFAULT_MAX_HEADER_BYTES;

    fn scan(raw: &[u8]) -> bool {
        let (block, body) = split_header_body(raw, DEFAULT_MAX_HEADER_BYTES).unwrap();
        has_attachments(&parse_headers(block), body, DEFAULT_MAX_HEADER_BYTES)
    }

    #[test]
    fn content_type_params() {
        let ct = content_type(r#"Multipart/Mixed; Boundary="--:b=1" ; charset=utf-8;"#).unwrap();
        assert_eq!(ct.mime_type, "multipart/mixed");
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), Some("--:b=1"));
        assert_eq!(ct.params.get("charset").map(String::as_str), Some("utf-8"));

        let ct = content_type("text/plain").unwrap();
        assert!(!ct.is_multipart());
        assert_eq!(ct.boundary(), None);

        assert_eq!(content_type("garbage"), None);
    }

    #[test]
    fn disposition() {
        assert_eq!(
            disposition_type(r#"Attachment; filename="a.pdf""#),
            Some("attachment".to_string())
        );
        assert_eq!(disposition_type("inline"), Some("inline".to_string()));
        assert_eq!(disposition_type(" ; x=y"), None);
    }

    #[test]
    fn plain_text_has_none() {
        assert!(!scan(b"Content-Type: text/plain\r\n\r\nContent-Disposition: attachment\r\n"));
        assert!(!scan(b"Subject: no type at all\r\n\r\nhello\r\n"));
    }

    #[test]
    fn attachment_part() {
        let raw = b"Content-Type: multipart/mixed; boundary=\"b1\"\r\n\r\n\
preamble\r\n\
--b1\r\n\
Content-Type: text/plain\r\n\r\n\
hello\r\n\
--b1\r\n\
Content-Type: application/pdf\r\n\
Content-Disposition: attachment; filename=\"a.pdf\"\r\n\r\n\
JVBERi0=\r\n\
--b1--\r\n";
        assert!(scan(raw));
    }

    #[test]
    fn inline_parts_only() {
        let raw = b"Content-Type: multipart/alternative; boundary=b1\n\n\
--b1\n\
Content-Type: text/plain\n\n\
Content-Disposition: attachment\n\
--b1\n\
Content-Type: image/png\n\
Content-Disposition: inline\n\n\
iVBORw0=\n\
--b1--\n\
--b1\n\
Content-Disposition: attachment\n\n\
epilogue\n";
        assert!(!scan(raw));
    }

    #[test]
    fn nested_multipart() {
        let raw = b"Content-Type: multipart/mixed; boundary=outer\r\n\r\n\
--outer\r\n\
Content-Type: multipart/related; boundary=inner\r\n\r\n\
--inner\r\n\
Content-Type: text/html\r\n\r\n\
<p>hi</p>\r\n\
--inner\r\n\
Content-Disposition: ATTACHMENT\r\n\
--inner--\r\n\
--outer--\r\n";
        assert!(scan(raw));
    }

    #[test]
    fn longer_boundary_is_not_a_delimiter() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\r\n\r\n\
--b\r\n\
Content-Type: text/plain\r\n\r\n\
--bb\r\n\
Content-Disposition: attachment\r\n\r\n\
x\r\n\
--b--\r\n";
        assert!(!scan(raw));
    }

    #[test]
    fn nesting_is_bounded() {
        let mut raw = Vec::new();
        for level in 0..MAX_MULTIPART_DEPTH + 2 {
            raw.extend_from_slice(
                format!(
                    "Content-Type: multipart/mixed; boundary=l{}\r\n\r\n--l{}\r\n",
                    level, level
                )
                .as_bytes(),
            );
        }
        raw.extend_from_slice(b"Content-Disposition: attachment\r\n\r\nx\r\n");
        assert!(!scan(&raw));
    }
}
