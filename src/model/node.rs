//! MIME tree nodes.
//!
//! A [`MimeNode`] is either a leaf holding a decoded payload or a container
//! holding ordered children. A node is a container iff its content type is
//! `multipart/*`.

use std::borrow::Cow;
use std::fmt;

use crate::parser::charset::decode_lossy;

/// Ordered header list. Names compare case-insensitively; values are the raw
/// bytes as they were read (including any folding whitespace and 8-bit
/// octets), decoded only when asked for text.
///
/// Mutation is functional: [`Headers::without`] and [`Headers::replaced`]
/// return a new list, so a tree built from these never sees a header move
/// underneath it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    entries: Vec<(String, Vec<u8>)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping any existing values with the same name.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First raw value for `name` (case-insensitive).
    pub fn get_raw(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// First value for `name` as text. Values that are not UTF-8 are read as
    /// Windows-1252; the stored bytes are untouched.
    pub fn get(&self, name: &str) -> Option<Cow<'_, str>> {
        self.get_raw(name).map(decode_lossy)
    }

    /// First value for `name` as text with folding collapsed and surrounding whitespace trimmed.
    pub fn get_unfolded(&self, name: &str) -> Option<String> {
        self.get_raw(name)
            .map(|raw| decode_lossy(&unfold_bytes(raw)).into_owned())
    }

    /// All values for `name` as text, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = Cow<'a, str>> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| decode_lossy(v))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get_raw(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A copy without any header whose name is in `names` (case-insensitive).
    pub fn without(&self, names: &[&str]) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(k, _)| !names.iter().any(|n| k.eq_ignore_ascii_case(n)))
                .cloned()
                .collect(),
        }
    }

    /// A copy where every `name` header is dropped and a single new value is appended.
    pub fn replaced(&self, name: &str, value: impl Into<Vec<u8>>) -> Self {
        let mut next = self.without(&[name]);
        next.push(name, value);
        next
    }
}

impl FromIterator<(String, Vec<u8>)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, Vec<u8>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Collapse embedded line breaks (and the folding whitespace after them) to
/// single spaces and trim the result. Other octets pass through unchanged.
pub fn unfold_bytes(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut pending_space = false;
    let mut bytes = raw.iter().copied().peekable();
    while let Some(b) = bytes.next() {
        if b == b'\r' || b == b'\n' {
            while matches!(bytes.peek(), Some(b'\r' | b'\n' | b' ' | b'\t')) {
                bytes.next();
            }
            pending_space = true;
            continue;
        }
        if pending_space {
            if !out.is_empty() && out.last() != Some(&b' ') {
                out.push(b' ');
            }
            pending_space = false;
        }
        out.push(b);
    }
    out.trim_ascii().to_vec()
}

/// A parsed `Content-Type`: lowercase `type/subtype` plus ordered parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentType {
    mime_type: String,
    params: Vec<(String, String)>,
}

impl ContentType {
    pub fn new(mime_type: &str) -> Self {
        Self {
            mime_type: mime_type.trim().to_ascii_lowercase(),
            params: Vec::new(),
        }
    }

    /// Builder-style parameter setter; replaces an existing parameter of the same name.
    pub fn with_param(mut self, name: &str, value: impl Into<String>) -> Self {
        let name = name.to_ascii_lowercase();
        self.params.retain(|(k, _)| *k != name);
        self.params.push((name, value.into()));
        self
    }

    /// RFC 2045 default for parts with no `Content-Type` header.
    pub fn default_text() -> Self {
        Self::new("text/plain").with_param("charset", "us-ascii")
    }

    /// The full lowercase `type/subtype`.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The major type (`text`, `image`, `multipart`, ...).
    pub fn main_type(&self) -> &str {
        self.mime_type.split('/').next().unwrap_or("")
    }

    pub fn is(&self, mime_type: &str) -> bool {
        self.mime_type.eq_ignore_ascii_case(mime_type)
    }

    pub fn is_multipart(&self) -> bool {
        self.main_type() == "multipart"
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn charset(&self) -> Option<&str> {
        self.param("charset").filter(|c| !c.is_empty())
    }
}

impl fmt::Display for ContentType {
    /// Header-value form, quoting parameter values when they contain specials.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mime_type)?;
        for (name, value) in &self.params {
            if needs_quoting(value) {
                let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "; {name}=\"{escaped}\"")?;
            } else {
                write!(f, "; {name}={value}")?;
            }
        }
        Ok(())
    }
}

/// True if a parameter value contains RFC 2045 `tspecials`, whitespace, or is empty.
pub(crate) fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || value.chars().any(|c| {
            c.is_ascii_whitespace()
                || c.is_ascii_control()
                || matches!(
                    c,
                    '(' | ')' | '<' | '>' | '@' | ',' | ';' | ':' | '\\' | '"' | '/' | '[' | ']'
                        | '?' | '='
                )
        })
}

/// Payload of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Transfer-decoded bytes of a leaf part.
    Leaf(Vec<u8>),
    /// Ordered children of a `multipart/*` container.
    Multipart(Vec<MimeNode>),
}

/// One node of a MIME tree.
#[derive(Debug, Clone, PartialEq)]
pub struct MimeNode {
    headers: Headers,
    content_type: ContentType,
    /// Parsed `Content-Disposition` (`attachment`/`inline` plus parameters),
    /// when the part declared one.
    disposition: Option<ContentType>,
    body: Body,
}

impl MimeNode {
    /// Build a leaf. A `multipart/*` type is not allowed on a leaf and is
    /// downgraded to `application/octet-stream`.
    pub fn leaf(headers: Headers, content_type: ContentType, payload: Vec<u8>) -> Self {
        let content_type = if content_type.is_multipart() {
            ContentType::new("application/octet-stream")
        } else {
            content_type
        };
        Self {
            headers,
            content_type,
            disposition: None,
            body: Body::Leaf(payload),
        }
    }

    /// Build a `multipart/<subtype>` container.
    pub fn multipart(headers: Headers, content_type: ContentType, children: Vec<MimeNode>) -> Self {
        let content_type = if content_type.is_multipart() {
            content_type
        } else {
            ContentType::new("multipart/mixed")
        };
        Self {
            headers,
            content_type,
            disposition: None,
            body: Body::Multipart(children),
        }
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn content_type(&self) -> &ContentType {
        &self.content_type
    }

    pub fn disposition(&self) -> Option<&ContentType> {
        self.disposition.as_ref()
    }

    /// Same node with a parsed `Content-Disposition` attached.
    pub fn with_disposition(self, disposition: ContentType) -> Self {
        Self {
            disposition: Some(disposition),
            ..self
        }
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn is_container(&self) -> bool {
        matches!(self.body, Body::Multipart(_))
    }

    /// Decoded payload of a leaf, `None` for containers.
    pub fn payload(&self) -> Option<&[u8]> {
        match &self.body {
            Body::Leaf(bytes) => Some(bytes),
            Body::Multipart(_) => None,
        }
    }

    /// Children of a container, empty for leaves.
    pub fn children(&self) -> &[MimeNode] {
        match &self.body {
            Body::Leaf(_) => &[],
            Body::Multipart(children) => children,
        }
    }

    /// Same node with its header list swapped.
    pub fn with_headers(self, headers: Headers) -> Self {
        Self { headers, ..self }
    }

    /// Number of leaves below (and including) this node.
    pub fn leaf_count(&self) -> usize {
        match &self.body {
            Body::Leaf(_) => 1,
            Body::Multipart(children) => children.iter().map(MimeNode::leaf_count).sum(),
        }
    }
}
