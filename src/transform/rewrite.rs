//! Envelope header rewriting.
//!
//! The relay may only send as its own verified address, so the forwarded
//! message goes out `From` the relay with the original sender's display text,
//! replies route back to the original sender through `Reply-To`, and bounces
//! go to the configured `Return-Path`.

use std::sync::LazyLock;

use regex::bytes::Regex;

use crate::config::{Config, ReturnPathPolicy};
use crate::model::address::EmailAddress;
use crate::model::node::{unfold_bytes, MimeNode};
use crate::parser::charset::decode_lossy;

/// Signature headers that no longer verify once the message is changed.
pub const SIGNATURE_HEADERS: [&str; 5] = [
    "dkim-signature",
    "domainkey-signature",
    "arc-seal",
    "arc-message-signature",
    "arc-authentication-results",
];

/// Angle-bracket address segments of a From value.
static ANGLE_ADDR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)<.+?>").expect("address pattern is valid"));

/// Result of [`HeaderRewriter::rewrite`].
#[derive(Debug, Clone)]
pub struct Rewritten {
    pub message: MimeNode,
    /// The From value as it was before rewriting, unfolded and read as text
    /// for logs. Empty if absent.
    pub original_from: String,
}

/// Rewrites `From`, `Reply-To` and `Return-Path` of a message root.
#[derive(Debug, Clone)]
pub struct HeaderRewriter {
    relay_sender: EmailAddress,
    return_path: EmailAddress,
}

impl HeaderRewriter {
    pub fn new(relay_sender: EmailAddress, return_path: EmailAddress) -> Self {
        Self {
            relay_sender,
            return_path,
        }
    }

    /// Rewriter for the configured relay sender and return-path policy.
    pub fn from_config(config: &Config) -> Self {
        let relay_sender = config.sender_address();
        let return_path = match config.policy.return_path {
            ReturnPathPolicy::Sender => relay_sender.clone(),
            ReturnPathPolicy::Recipient => config.recipient_address(),
        };
        Self::new(relay_sender, return_path)
    }

    /// Apply the rewrite. Each header is replaced outright, never appended to.
    ///
    /// The original From octets are carried over as they were: `Reply-To`
    /// is the unfolded value and the new `From` keeps its display text.
    pub fn rewrite(&self, message: MimeNode) -> Rewritten {
        let headers = message.headers().without(&SIGNATURE_HEADERS);
        let unfolded_from = headers.get_raw("from").map(unfold_bytes).unwrap_or_default();

        let display = ANGLE_ADDR.replace_all(&unfolded_from, &b""[..]);
        let display = quote_phrase(display.trim_ascii());
        let relay = self.relay_sender.address.as_bytes();
        let from = if display.is_empty() {
            relay.to_vec()
        } else {
            [&display[..], b" <", relay, b">"].concat()
        };

        let mut headers = headers.replaced("From", from);
        headers = if unfolded_from.is_empty() {
            headers.without(&["reply-to"])
        } else {
            headers.replaced("Reply-To", unfolded_from.clone())
        };
        headers = headers.replaced("Return-Path", format!("<{}>", self.return_path.address));

        Rewritten {
            message: message.with_headers(headers),
            original_from: decode_lossy(&unfolded_from).into_owned(),
        }
    }
}

/// Quote display text that would not parse as an RFC 5322 phrase, such as a
/// bare address left over from `From: alice@example.com`.
fn quote_phrase(text: &[u8]) -> Vec<u8> {
    let already_quoted = text.len() >= 2 && text.starts_with(b"\"") && text.ends_with(b"\"");
    let special = text.iter().any(|b| {
        matches!(
            b,
            b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"' | b'.' | b'[' | b']'
        )
    });
    if already_quoted || !special {
        return text.to_vec();
    }
    let mut quoted = Vec::with_capacity(text.len() + 2);
    quoted.push(b'"');
    for &b in text {
        if b == b'\\' || b == b'"' {
            quoted.push(b'\\');
        }
        quoted.push(b);
    }
    quoted.push(b'"');
    quoted
}
