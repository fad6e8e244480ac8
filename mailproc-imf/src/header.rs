use nom::{
    branch::alt,
    bytes::complete::{tag, take, take_till, take_while, take_while1},
    combinator::{eof, map, opt, recognize, verify},
    multi::many0,
    sequence::{pair, preceded, tuple},
    IResult,
};

/// Headers bigger than this are considered as a corrupted input.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;

/// One header field, unfolded, name kept with its original case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Ordered multi-map of header fields.
///
/// Lookups are case-insensitive, duplicates are kept in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(pub Vec<Header>);

impl Headers {
    pub fn first(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Split a message at the blank line that ends its header block.
///
/// Only the first `limit` bytes are scanned for the blank line, so a
/// corrupted input can not make us walk an unbounded buffer. The header
/// block keeps the line ending of its last field, the body starts right
/// after the blank line. Both CRLF and bare LF line endings are accepted.
pub fn split_header_body(input: &[u8], limit: usize) -> Option<(&[u8], &[u8])> {
    let scan = &input[..input.len().min(limit.saturating_add(2))];
    let mut line_start = 0;
    while line_start <= limit {
        let rest = &scan[line_start..];
        if rest.starts_with(b"\r\n") {
            return Some((&input[..line_start], &input[line_start + 2..]));
        }
        if rest.starts_with(b"\n") {
            return Some((&input[..line_start], &input[line_start + 1..]));
        }
        match rest.iter().position(|c| *c == b'\n') {
            Some(p) => line_start += p + 1,
            None => return None,
        }
    }
    None
}

/// Decode a header block into its fields.
///
/// Lines that are not `name: value` (nor a continuation of such a line)
/// are skipped: the metadata we extract is advisory, one broken line must
/// not discard the whole message.
pub fn parse_headers(block: &[u8]) -> Headers {
    match many0(alt((map(field, Some), map(invalid_line, |_| None))))(block) {
        Ok((_, fields)) => Headers(fields.into_iter().flatten().collect()),
        Err(e) => {
            tracing::debug!("header block parsing stopped early: {:?}", e);
            Headers::default()
        }
    }
}

// ---------------------

fn is_eol(c: u8) -> bool {
    c == b'\r' || c == b'\n'
}

fn is_wsp(c: u8) -> bool {
    c == b' ' || c == b'\t'
}

// RFC 5322 ftext: printable US-ASCII except colon
fn is_ftext(c: u8) -> bool {
    (33..=126).contains(&c) && c != b':'
}

fn line_end<'a>(input: &'a [u8]) -> IResult<&'a [u8], &'a [u8]> {
    alt((tag(b"\r\n"), tag(b"\n")))(input)
}

fn field_name<'a>(input: &'a [u8]) -> IResult<&'a [u8], &'a [u8]> {
    take_while1(is_ftext)(input)
}

/// A continuation line starts with a white space
fn continuation<'a>(input: &'a [u8]) -> IResult<&'a [u8], &'a [u8]> {
    preceded(
        line_end,
        recognize(pair(take_while1(is_wsp), take_till(is_eol))),
    )(input)
}

fn unstructured<'a>(input: &'a [u8]) -> IResult<&'a [u8], String> {
    let (input, (first, rest)) = pair(take_till(is_eol), many0(continuation))(input)?;

    // Unfolding is removing the CRLF that precedes each white space
    let mut value = String::from_utf8_lossy(first).into_owned();
    for line in rest {
        value.push_str(&String::from_utf8_lossy(line));
    }
    Ok((input, value.trim().to_string()))
}

fn field<'a>(input: &'a [u8]) -> IResult<&'a [u8], Header> {
    let (input, (name, _, _, value, _)) = tuple((
        field_name,
        take_while(is_wsp),
        tag(b":"),
        unstructured,
        alt((line_end, eof)),
    ))(input)?;

    Ok((
        input,
        Header {
            name: String::from_utf8_lossy(name).into_owned(),
            value,
        },
    ))
}

fn invalid_line<'a>(input: &'a [u8]) -> IResult<&'a [u8], &'a [u8]> {
    verify(
        recognize(pair(take_till(is_eol), opt(alt((line_end, take(1usize)))))),
        |line: &[u8]| !line.is_empty(),
    )(input)
}
