//! MIME message parsing: raw bytes to a [`MimeNode`] tree.
//!
//! Structure, transfer decoding and parameter parsing come from
//! `mail-parser`. Header values are sliced out of the original bytes by
//! offset, so they keep their folding and any 8-bit octets.

use mail_parser::{Header, Message, MessageParser, MessagePart, MimeHeaders, PartType};
use tracing::warn;

use crate::error::{ForwardError, Result};
use crate::model::node::{ContentType, Headers, MimeNode};

/// Maximum multipart nesting (to prevent stack overflow on adversarial input).
/// Deeper containers are kept as opaque leaves.
const MAX_DEPTH: usize = 32;

/// Parse a complete raw message (headers + body) into a MIME tree.
///
/// Fails with [`ForwardError::Parse`] when no header field can be read.
pub fn parse(raw_message: &[u8]) -> Result<MimeNode> {
    let message_bytes = skip_from_line(raw_message);
    if message_bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(ForwardError::Parse("message is empty".into()));
    }

    let message = MessageParser::default()
        .parse(message_bytes)
        .ok_or_else(|| ForwardError::Parse("not an RFC 5322 message".into()))?;
    let root = message
        .parts
        .first()
        .filter(|root| !root.headers.is_empty())
        .ok_or_else(|| ForwardError::Parse("no header fields found before the body".into()))?;

    Ok(convert(&message, root, 0))
}

/// Build one node (and its children) from a parsed part.
fn convert(message: &Message<'_>, part: &MessagePart<'_>, depth: usize) -> MimeNode {
    let raw = message.raw_message();
    let headers = raw_headers(raw, &part.headers);
    let content_type = content_type_of(part);

    let node = match &part.body {
        PartType::Multipart(_) if depth >= MAX_DEPTH => {
            warn!(depth = depth, "Multipart nesting too deep, keeping part opaque");
            let body = raw
                .get(part.raw_body_offset() as usize..part.raw_end_offset() as usize)
                .unwrap_or_default();
            MimeNode::leaf(
                headers,
                ContentType::new("application/octet-stream"),
                body.to_vec(),
            )
        }
        PartType::Multipart(ids) => {
            let children = ids
                .iter()
                .filter_map(|id| message.parts.get(*id as usize))
                .map(|child| convert(message, child, depth + 1))
                .collect();
            MimeNode::multipart(headers, content_type, children)
        }
        _ => MimeNode::leaf(headers, content_type, part.contents().to_vec()),
    };

    match part.content_disposition() {
        Some(disposition) => node.with_disposition(params_of(disposition, disposition.ctype())),
        None => node,
    }
}

/// Ordered `(name, raw value)` list for a part, sliced from the message bytes.
///
/// The value starts after the colon and one optional space, keeps inner
/// folding, and loses only the final line break.
fn raw_headers(raw: &[u8], fields: &[Header<'_>]) -> Headers {
    fields
        .iter()
        .filter_map(|field| {
            let bytes = raw.get(field.offset_field as usize..field.offset_end as usize)?;
            let colon = bytes.iter().position(|&b| b == b':')?;
            let name = std::str::from_utf8(&bytes[..colon]).ok()?.trim();
            if name.is_empty() {
                return None;
            }
            let value = &bytes[colon + 1..];
            let value = value.strip_prefix(b" ").unwrap_or(value);
            let value = value.strip_suffix(b"\n").unwrap_or(value);
            let value = value.strip_suffix(b"\r").unwrap_or(value);
            Some((name.to_string(), value.to_vec()))
        })
        .collect()
}

/// The part's content type. Text bodies are handed over already decoded to
/// UTF-8, so their charset is rewritten to match.
fn content_type_of(part: &MessagePart<'_>) -> ContentType {
    let declared = part.content_type().and_then(|ct| {
        let subtype = ct.subtype()?;
        Some(params_of(ct, &format!("{}/{}", ct.ctype(), subtype)))
    });

    match (&part.body, declared) {
        (PartType::Text(_) | PartType::Html(_), Some(ct)) => ct.with_param("charset", "utf-8"),
        (PartType::Text(_), None) => ContentType::new("text/plain").with_param("charset", "utf-8"),
        (PartType::Html(_), None) => ContentType::new("text/html").with_param("charset", "utf-8"),
        (PartType::Message(_), None) => ContentType::new("message/rfc822"),
        (_, Some(ct)) => ct,
        (_, None) => ContentType::default_text(),
    }
}

/// Copy a parsed structured header (type plus decoded parameters).
fn params_of(parsed: &mail_parser::ContentType<'_>, value: &str) -> ContentType {
    parsed
        .attributes()
        .into_iter()
        .flatten()
        .fold(ContentType::new(value), |ct, (name, val)| {
            ct.with_param(name, val.to_string())
        })
}

/// Skip a UTF-8 BOM and the `From ` separator line of mbox-framed input.
fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);

    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}
