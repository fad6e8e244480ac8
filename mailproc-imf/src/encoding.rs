use base64::{engine::general_purpose, Engine as _};
use nom::{
    bytes::complete::{tag, take_till, take_till1},
    character::complete::one_of,
    sequence::tuple,
    IResult,
};

/// Decode RFC 2047 encoded-words found in an unstructured header value.
///
/// Words in an unknown charset, or that do not decode, are kept verbatim.
/// White space between two adjacent encoded-words is dropped.
pub fn decode_words(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    // white space seen since the last decoded word, held back in case
    // another encoded-word follows
    let mut pending_ws: Option<&str> = None;

    while !rest.is_empty() {
        if let Ok((next, decoded)) = encoded_word(rest) {
            if let Some(text) = decode_word(&decoded) {
                pending_ws = None;
                out.push_str(&text);
                rest = next;

                let ws_len = rest.len()
                    - rest
                        .trim_start_matches(|c: char| c == ' ' || c == '\t')
                        .len();
                if ws_len > 0 {
                    pending_ws = Some(&rest[..ws_len]);
                    rest = &rest[ws_len..];
                }
                continue;
            }
        }

        if let Some(ws) = pending_ws.take() {
            out.push_str(ws);
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }

    if let Some(ws) = pending_ws {
        out.push_str(ws);
    }
    out
}

#[derive(Debug, PartialEq)]
struct EncodedWord<'a> {
    charset: &'a str,
    encoding: char,
    text: &'a str,
}

fn encoded_word<'a>(input: &'a str) -> IResult<&'a str, EncodedWord<'a>> {
    let (input, (_, charset, _, encoding, _, text, _)) = tuple((
        tag("=?"),
        take_till1(|c: char| c == '?' || c == ' '),
        tag("?"),
        one_of("BbQq"),
        tag("?"),
        take_till(|c: char| c == '?' || c == ' '),
        tag("?="),
    ))(input)?;

    Ok((
        input,
        EncodedWord {
            charset,
            encoding,
            text,
        },
    ))
}

fn decode_word(word: &EncodedWord) -> Option<String> {
    // RFC 2231 language suffix: charset*lang
    let charset = word.charset.split('*').next()?.to_ascii_lowercase();

    let bytes = match word.encoding {
        'B' | 'b' => general_purpose::STANDARD
            .decode(word.text)
            .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(word.text))
            .ok()?,
        _ => decode_q(word.text)?,
    };

    match charset.as_str() {
        "utf-8" | "utf8" | "us-ascii" | "ascii" => String::from_utf8(bytes).ok(),
        "iso-8859-1" | "latin1" | "iso8859-1" => {
            Some(bytes.into_iter().map(char::from).collect())
        }
        _ => {
            tracing::debug!(charset = %charset, "unsupported encoded-word charset");
            None
        }
    }
}

fn decode_q(text: &str) -> Option<Vec<u8>> {
    let raw = text.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'_' => out.push(b' '),
            b'=' => {
                let digits = raw.get(i + 1..i + 3)?;
                out.extend(hex::decode(digits).ok()?);
                i += 2;
            }
            c => out.push(c),
        }
        i += 1;
    }
    Some(out)
}
