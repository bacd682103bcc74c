//! Message rebuilding.
//!
//! Produces a fresh tree from the classified parts of the original:
//!
//! ```text
//! multipart/related            (only when inline parts exist)
//! ├── multipart/alternative
//! │   ├── text/plain
//! │   └── text/html            (+ attachment link list)
//! └── inline parts, unchanged
//! ```
//!
//! Top-level headers are copied from the original except the MIME structure
//! headers, which the serializer sets itself.

use crate::model::node::{unfold_bytes, ContentType, Headers, MimeNode};
use crate::model::part::{AttachmentLink, ClassifiedPart, PartRole};
use crate::transform::html;

/// Headers describing the original structure; never copied to the rebuilt root.
pub const EXCLUDED_HEADERS: [&str; 4] = [
    "content-type",
    "content-transfer-encoding",
    "mime-version",
    "content-disposition",
];

/// Build the forwarded message from `original` and its classified leaves.
pub fn rebuild(
    original: &MimeNode,
    parts: &[ClassifiedPart<'_>],
    links: &[AttachmentLink],
) -> MimeNode {
    let plain = body_text(parts, PartRole::PlainBody);
    let html_source = body_text(parts, PartRole::HtmlBody);

    let mut html_body = match (html_source, plain) {
        (Some(html), _) => html.to_string(),
        (None, Some(plain)) => html::plain_to_html(plain),
        (None, None) => String::new(),
    };
    let mut plain_body = match (plain, html_source) {
        (Some(plain), _) => plain.to_string(),
        (None, Some(html)) => html::html_to_text(html),
        (None, None) => String::new(),
    };

    if !links.is_empty() {
        html_body = html::insert_before_body_close(&html_body, &html::link_list(links));
        if !plain_body.is_empty() {
            plain_body.push_str("\n\n");
        }
        plain_body.push_str(&html::link_list_text(links));
    }

    // HTML last: readers prefer the last alternative they can render.
    let alternative = MimeNode::multipart(
        Headers::new(),
        ContentType::new("multipart/alternative"),
        vec![
            text_leaf("text/plain", plain_body),
            text_leaf("text/html", html_body),
        ],
    );

    let inline: Vec<MimeNode> = parts
        .iter()
        .filter(|p| p.role == PartRole::Inline)
        .map(|p| p.node.clone())
        .collect();

    let headers = copy_headers(original.headers());

    if inline.is_empty() {
        return alternative.with_headers(headers);
    }

    let mut children = Vec::with_capacity(inline.len() + 1);
    children.push(alternative);
    children.extend(inline);
    MimeNode::multipart(
        headers,
        ContentType::new("multipart/related").with_param("type", "multipart/alternative"),
        children,
    )
}

/// Copy `headers` minus [`EXCLUDED_HEADERS`], with every value unfolded onto
/// one line and trimmed.
pub fn copy_headers(headers: &Headers) -> Headers {
    headers
        .without(&EXCLUDED_HEADERS)
        .iter()
        .map(|(name, value)| (name.to_string(), unfold_bytes(value)))
        .collect()
}

fn body_text<'p>(parts: &'p [ClassifiedPart<'_>], role: PartRole) -> Option<&'p str> {
    parts
        .iter()
        .find(|p| p.role == role)
        .and_then(|p| p.text.as_deref())
}

fn text_leaf(mime_type: &str, text: String) -> MimeNode {
    MimeNode::leaf(
        Headers::new(),
        ContentType::new(mime_type).with_param("charset", "utf-8"),
        text.into_bytes(),
    )
}
