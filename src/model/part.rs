//! Classified leaf parts and attachment links.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use super::node::MimeNode;

/// Lifetime of every retrieval link handed out for a relocated attachment.
pub const LINK_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Role assigned to a leaf part by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartRole {
    PlainBody,
    HtmlBody,
    Inline,
    Attachment,
    Ignored,
}

impl fmt::Display for PartRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PlainBody => "plain-body",
            Self::HtmlBody => "html-body",
            Self::Inline => "inline",
            Self::Attachment => "attachment",
            Self::Ignored => "ignored",
        };
        f.write_str(s)
    }
}

/// A leaf of the original tree together with its role.
///
/// `text` is filled for body roles (charset-decoded), `filename` for
/// attachments, `content_id` for inline parts.
#[derive(Debug, Clone)]
pub struct ClassifiedPart<'a> {
    pub role: PartRole,
    pub node: &'a MimeNode,
    pub text: Option<String>,
    pub filename: Option<String>,
    pub content_id: Option<String>,
}

impl ClassifiedPart<'_> {
    /// Decoded payload bytes of the underlying leaf.
    pub fn payload(&self) -> &[u8] {
        self.node.payload().unwrap_or_default()
    }
}

/// Retrieval link for one relocated attachment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachmentLink {
    pub filename: String,
    pub url: String,
    #[serde(skip)]
    pub expiry: Duration,
}
