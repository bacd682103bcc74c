//! Part classification.
//!
//! Walks the tree depth-first, skipping containers, and gives every leaf one
//! [`PartRole`]. Per leaf, first match wins:
//!
//! 1. disposition contains `attachment` and a filename is present → `Attachment`
//!    (without a filename → `Ignored`)
//! 2. `text/html` while no HTML body has been chosen → `HtmlBody`
//! 3. `text/plain` while no plain body has been chosen → `PlainBody`
//! 4. a non-empty `Content-ID` → `Inline`
//! 5. anything else → `Ignored`

use tracing::{debug, warn};

use crate::model::node::MimeNode;
use crate::model::part::{ClassifiedPart, PartRole};
use crate::parser::charset::decode_text;

/// Classify every leaf of `root` in depth-first order.
pub fn classify(root: &MimeNode) -> Vec<ClassifiedPart<'_>> {
    let mut state = Selection::default();
    let mut parts = Vec::with_capacity(root.leaf_count());
    walk(root, &mut state, &mut parts);
    parts
}

#[derive(Default)]
struct Selection {
    plain_chosen: bool,
    html_chosen: bool,
}

fn walk<'a>(node: &'a MimeNode, state: &mut Selection, out: &mut Vec<ClassifiedPart<'a>>) {
    if node.is_container() {
        for child in node.children() {
            walk(child, state, out);
        }
        return;
    }
    out.push(classify_leaf(node, state));
}

fn classify_leaf<'a>(node: &'a MimeNode, state: &mut Selection) -> ClassifiedPart<'a> {
    let headers = node.headers();
    let content_type = node.content_type();
    let disposition = node.disposition();

    let filename = disposition
        .and_then(|d| d.param("filename"))
        .or_else(|| content_type.param("name"))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());

    let content_id = headers
        .get_unfolded("content-id")
        .filter(|cid| !cid.is_empty());

    let mut part = ClassifiedPart {
        role: PartRole::Ignored,
        node,
        text: None,
        filename: None,
        content_id: None,
    };

    if disposition.is_some_and(|d| d.mime_type().contains("attachment")) {
        match filename {
            Some(name) => {
                part.role = PartRole::Attachment;
                part.filename = Some(name);
            }
            None => warn!(
                content_type = %content_type.mime_type(),
                "Attachment without filename cannot be relocated, ignoring"
            ),
        }
        return part;
    }

    if content_type.is("text/html") && !state.html_chosen {
        state.html_chosen = true;
        part.role = PartRole::HtmlBody;
        part.text = Some(decode_part_text(node));
    } else if content_type.is("text/plain") && !state.plain_chosen {
        state.plain_chosen = true;
        part.role = PartRole::PlainBody;
        part.text = Some(decode_part_text(node));
    } else if let Some(cid) = content_id {
        part.role = PartRole::Inline;
        part.content_id = Some(cid);
        part.filename = filename;
    } else {
        debug!(content_type = %content_type.mime_type(), "Ignoring part");
    }
    part
}

/// Charset-decode a text leaf; never fails.
fn decode_part_text(node: &MimeNode) -> String {
    decode_text(node.payload().unwrap_or_default(), node.content_type().charset())
}
