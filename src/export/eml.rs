//! Serialize a [`MimeNode`] tree as RFC 5322 message bytes (`.eml`).
//!
//! Output always uses CRLF line endings. The serializer owns the MIME
//! structure headers: any `Content-Type`, `Content-Transfer-Encoding` or
//! `MIME-Version` carried in a node's header list is replaced by values
//! derived from the node itself.

use lettre::message::header::ContentTransferEncoding;
use lettre::message::Body;
use sha2::{Digest, Sha256};

use crate::model::node::{ContentType, MimeNode};

/// Longest line allowed in 7bit/8bit content, excluding CRLF (RFC 5322 §2.1.1).
pub const MAX_LINE_OCTETS: usize = 998;

const STRUCTURE_HEADERS: [&str; 3] = ["content-type", "content-transfer-encoding", "mime-version"];

/// Render a whole message. `MIME-Version: 1.0` is added on the root only.
pub fn to_bytes(root: &MimeNode) -> Vec<u8> {
    let mut out = Vec::new();
    write_node(root, true, &mut out);
    if !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// True if `bytes` can travel without transfer encoding: no NUL, no bare CR,
/// and no line longer than [`MAX_LINE_OCTETS`].
pub fn is_line_safe(bytes: &[u8]) -> bool {
    if bytes.contains(&0) {
        return false;
    }
    let mut line_len = 0;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'\n' => line_len = 0,
            b'\r' if bytes.get(i + 1) == Some(&b'\n') => {}
            b'\r' => return false,
            _ => {
                line_len += 1;
                if line_len > MAX_LINE_OCTETS {
                    return false;
                }
            }
        }
    }
    true
}

/// Transfer-encode a leaf payload.
///
/// Text lets lettre pick the encoding. `message/*` may not be encoded (RFC 2046 §5.2.1) and is passed as 7bit or
/// 8bit when its lines allow it. Everything else is base64.
pub fn encode_leaf(content_type: &ContentType, payload: &[u8]) -> Body {
    let line_safe = is_line_safe(payload);
    match content_type.main_type() {
        "message" if line_safe => {
            let encoding = if payload.is_ascii() {
                ContentTransferEncoding::SevenBit
            } else {
                ContentTransferEncoding::EightBit
            };
            Body::dangerous_pre_encoded(normalize_line_endings(payload), encoding)
        }
        "text" if line_safe => match String::from_utf8(payload.to_vec()) {
            Ok(text) => Body::new(text),
            Err(err) => Body::new(err.into_bytes()),
        },
        _ => base64_body(payload.to_vec()),
    }
}

fn base64_body(payload: Vec<u8>) -> Body {
    Body::new_with_encoding(payload, ContentTransferEncoding::Base64).unwrap_or_else(Body::new)
}

// ── Writers ─────────────────────────────────────────────────────

fn write_node(node: &MimeNode, is_root: bool, out: &mut Vec<u8>) {
    for (name, value) in node.headers().iter() {
        if STRUCTURE_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        write_header(name, value, out);
    }
    if is_root {
        write_header("MIME-Version", b"1.0", out);
    }

    if node.is_container() {
        let parts: Vec<Vec<u8>> = node
            .children()
            .iter()
            .map(|child| {
                let mut part = Vec::new();
                write_node(child, false, &mut part);
                part
            })
            .collect();
        let boundary = boundary_for(&parts);
        let content_type = node.content_type().clone().with_param("boundary", boundary.as_str());
        write_header("Content-Type", content_type.to_string().as_bytes(), out);
        out.extend_from_slice(b"\r\n");

        for part in &parts {
            out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            out.extend_from_slice(part);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        return;
    }

    let body = encode_leaf(node.content_type(), node.payload().unwrap_or_default());
    write_header("Content-Type", node.content_type().to_string().as_bytes(), out);
    write_header("Content-Transfer-Encoding", body.encoding().to_string().as_bytes(), out);
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&body.into_vec());
}

/// Write one header field, value octets untouched. Line breaks inside the
/// value are kept only as folding: every continuation line starts with
/// whitespace.
fn write_header(name: &str, value: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    let lines = value
        .split(|&b| b == b'\r' || b == b'\n')
        .filter(|l| !l.iter().all(u8::is_ascii_whitespace));
    for (i, line) in lines.enumerate() {
        if i > 0 {
            out.extend_from_slice(b"\r\n");
            if !line.starts_with(b" ") && !line.starts_with(b"\t") {
                out.push(b' ');
            }
        }
        out.extend_from_slice(line);
    }
    out.extend_from_slice(b"\r\n");
}

/// Convert bare LF line endings to CRLF.
fn normalize_line_endings(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + payload.len() / 32);
    for (i, &b) in payload.iter().enumerate() {
        if b == b'\n' && (i == 0 || payload[i - 1] != b'\r') {
            out.push(b'\r');
        }
        out.push(b);
    }
    out
}

/// Boundary derived from the SHA-256 of the serialized parts, re-salted in
/// the unlikely case the candidate occurs inside a part.
fn boundary_for(parts: &[Vec<u8>]) -> String {
    let mut salt: u32 = 0;
    loop {
        let mut hasher = Sha256::new();
        hasher.update(salt.to_be_bytes());
        for part in parts {
            hasher.update(part);
        }
        let digest = format!("{:x}", hasher.finalize());
        let boundary = format!("=_mailfwd_{}", &digest[..32]);
        if !parts.iter().any(|p| contains(p, boundary.as_bytes())) {
            return boundary;
        }
        salt += 1;
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::node::Headers;
    use crate::parser::mime::parse;

    fn text(s: &str) -> String {
        s.to_string()
    }

    fn leaf(ct: &str, payload: &[u8]) -> MimeNode {
        MimeNode::leaf(Headers::new(), ContentType::new(ct), payload.to_vec())
    }

    #[test]
    fn test_single_text_leaf() {
        let mut headers = Headers::new();
        headers.push("Subject", "Hi");
        headers.push("Content-Type", "text/html");
        headers.push("MIME-Version", "1.0");
        let node = MimeNode::leaf(
            headers,
            ContentType::new("text/plain").with_param("charset", "utf-8"),
            b"line one\nline two".to_vec(),
        );
        let out = String::from_utf8(to_bytes(&node)).unwrap();
        assert_eq!(
            out,
            text(
                "Subject: Hi\r\n\
MIME-Version: 1.0\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
Content-Transfer-Encoding: 7bit\r\n\
\r\n\
line one\r\nline two\r\n"
            )
        );
    }

    #[test]
    fn test_non_ascii_text_is_base64() {
        let node = leaf("text/plain", "café".as_bytes());
        let out = String::from_utf8(to_bytes(&node)).unwrap();
        assert!(out.contains("Content-Transfer-Encoding: base64\r\n\r\nY2Fmw6k=\r\n"));
    }

    #[test]
    fn test_base64_lines_wrapped() {
        let node = leaf("application/octet-stream", &[0xAB; 300]);
        let out = to_bytes(&node);
        let body_start = out.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        let body = std::str::from_utf8(&out[body_start..]).unwrap();
        assert!(body.lines().all(|l| l.len() <= 76));
        assert!(body.lines().count() > 1);
    }

    #[test]
    fn test_roundtrip_structure_through_parser() {
        let alt = MimeNode::multipart(
            Headers::new(),
            ContentType::new("multipart/alternative"),
            vec![
                leaf("text/plain", b"plain"),
                leaf("text/html", b"<p>html</p>"),
            ],
        );
        let mut headers = Headers::new();
        headers.push("Subject", "Nested");
        let root = MimeNode::multipart(
            headers,
            ContentType::new("multipart/related").with_param("type", "multipart/alternative"),
            vec![alt, leaf("image/png", &[0x89, b'P', b'N', b'G', 0, 1, 2])],
        );

        let bytes = to_bytes(&root);
        let reparsed = parse(&bytes).unwrap();
        assert_eq!(reparsed.content_type().mime_type(), "multipart/related");
        assert_eq!(reparsed.headers().get("mime-version").as_deref(), Some("1.0"));
        let alt = &reparsed.children()[0];
        assert_eq!(alt.children()[0].payload(), Some(&b"plain"[..]));
        assert_eq!(alt.children()[1].payload(), Some(&b"<p>html</p>"[..]));
        assert_eq!(
            reparsed.children()[1].payload(),
            Some(&[0x89, b'P', b'N', b'G', 0, 1, 2][..])
        );
        // Only the root declares MIME-Version
        assert!(!alt.headers().contains("mime-version"));
    }

    #[test]
    fn test_boundaries_are_deterministic_and_distinct() {
        let inner = MimeNode::multipart(
            Headers::new(),
            ContentType::new("multipart/alternative"),
            vec![leaf("text/plain", b"a")],
        );
        let root = MimeNode::multipart(Headers::new(), ContentType::new("multipart/mixed"), vec![inner]);
        let first = to_bytes(&root);
        assert_eq!(first, to_bytes(&root));

        let out = String::from_utf8(first).unwrap();
        let boundaries: Vec<&str> = out
            .match_indices("boundary=")
            .map(|(i, _)| &out[i + 9..i + 9 + 10 + 32 + 2])
            .collect();
        assert_eq!(boundaries.len(), 2);
        assert_ne!(boundaries[0], boundaries[1]);
    }

    #[test]
    fn test_header_injection_is_folded() {
        let mut headers = Headers::new();
        headers.push("Subject", "hello\r\nBcc: victim@example.com");
        let node = MimeNode::leaf(headers, ContentType::default_text(), b"x".to_vec());
        let out = String::from_utf8(to_bytes(&node)).unwrap();
        assert!(out.starts_with("Subject: hello\r\n Bcc: victim@example.com\r\n"));
        assert!(!out.contains("\r\nBcc:"));
    }

    #[test]
    fn test_message_rfc822_stays_unencoded() {
        let node = leaf("message/rfc822", "Subject: é\n\nbody\n".as_bytes());
        let out = String::from_utf8(to_bytes(&node)).unwrap();
        assert!(out.contains("Content-Transfer-Encoding: 8bit\r\n\r\nSubject: é\r\n\r\nbody\r\n"));
    }

    #[test]
    fn test_long_text_lines_are_quoted_printable() {
        let text = format!("{}end", "word ".repeat(40));
        let node = leaf("text/plain", text.as_bytes());
        let out = String::from_utf8(to_bytes(&node)).unwrap();
        assert!(out.contains("Content-Transfer-Encoding: quoted-printable\r\n"));
        assert!(out.lines().all(|l| l.len() <= 76));
        let reparsed = parse(out.as_bytes()).unwrap();
        assert_eq!(reparsed.payload(), Some(text.as_bytes()));
    }

    #[test]
    fn test_8bit_header_octets_written_as_is() {
        let mut headers = Headers::new();
        headers.push("From", &b"Jos\xe9 <jose@example.com>"[..]);
        let node = MimeNode::leaf(headers, ContentType::default_text(), b"x".to_vec());
        let out = to_bytes(&node);
        assert!(out.starts_with(b"From: Jos\xe9 <jose@example.com>\r\n"));
    }

    #[test]
    fn test_is_line_safe() {
        assert!(is_line_safe(b"a\r\nb\nc"));
        assert!(!is_line_safe(b"a\rb"));
        assert!(!is_line_safe(b"nul\0"));
        assert!(!is_line_safe(&[b'x'; 999]));
        assert!(is_line_safe(&[b'x'; 998]));
    }
}
