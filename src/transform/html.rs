//! HTML helpers for the rebuilt body: escaping, plain-text conversion in both
//! directions, and the attachment link list in both forms.

use crate::model::part::AttachmentLink;

/// Escape text for inclusion in HTML element content or attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

/// Render plain text as an HTML preformatted block.
pub fn plain_to_html(text: &str) -> String {
    format!("<pre>{}</pre>", escape_html(text))
}

/// `<ul>` of links, one `<li>` per attachment in the given order.
pub fn link_list(links: &[AttachmentLink]) -> String {
    let mut html = String::from("<ul>");
    for link in links {
        html.push_str(&format!(
            "<li><a href=\"{}\">{}</a></li>",
            escape_html(&link.url),
            escape_html(&link.filename)
        ));
    }
    html.push_str("</ul>");
    html
}

/// Insert `snippet` before the first `</body` (ASCII case-insensitive), or
/// append it when the document has no closing body tag.
pub fn insert_before_body_close(html: &str, snippet: &str) -> String {
    // ASCII lowercasing keeps byte offsets valid for the original string.
    match html.to_ascii_lowercase().find("</body") {
        Some(pos) => {
            let mut out = String::with_capacity(html.len() + snippet.len());
            out.push_str(&html[..pos]);
            out.push_str(snippet);
            out.push_str(&html[pos..]);
            out
        }
        None => format!("{html}{snippet}"),
    }
}

/// The attachment list for the plain alternative: a heading, then one
/// `- name <url>` line per attachment.
pub fn link_list_text(links: &[AttachmentLink]) -> String {
    let mut text = String::from("Attachments:");
    for link in links {
        text.push_str(&format!("\n- {} <{}>", link.filename, link.url));
    }
    text
}

/// Elements whose content never reaches the text alternative.
const SKIPPED_ELEMENTS: [&str; 3] = ["script", "style", "head"];

/// Elements that start a new line.
const BLOCK_ELEMENTS: [&str; 14] = [
    "br", "p", "div", "tr", "table", "ul", "ol", "blockquote", "h1", "h2", "h3", "h4", "h5", "h6",
];

/// Convert HTML to plain text for the text alternative.
///
/// Single pass over the markup: block elements become line breaks, list
/// items become `- ` lines, links whose text differs from their target read
/// `text <url>`, and entities are decoded once. Blank line runs collapse.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut pending_href: Option<String> = None;
    let mut link_start = 0;
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        push_decoded(&mut out, &rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('>') else {
            rest = "";
            break;
        };
        let tag = Tag::parse(&after[..close]);
        rest = &after[close + 1..];

        if !tag.closing && SKIPPED_ELEMENTS.contains(&tag.name.as_str()) {
            rest = skip_past_close(rest, &tag.name);
            continue;
        }
        match (tag.name.as_str(), tag.closing) {
            ("li", false) => out.push_str("\n- "),
            ("a", false) => {
                pending_href = tag.href;
                link_start = out.len();
            }
            ("a", true) => {
                if let Some(href) = pending_href.take() {
                    let label = out[link_start..].trim();
                    if !href.is_empty() && label != href && !href.starts_with("cid:") {
                        out.push_str(&format!(" <{href}>"));
                    }
                }
            }
            (name, _) if BLOCK_ELEMENTS.contains(&name) => out.push('\n'),
            _ => {}
        }
    }
    push_decoded(&mut out, rest);

    collapse_blank_lines(&out)
}

/// The interesting parts of one `<...>` token.
struct Tag {
    name: String,
    closing: bool,
    href: Option<String>,
}

impl Tag {
    fn parse(inner: &str) -> Self {
        let inner = inner.trim();
        let (closing, inner) = match inner.strip_prefix('/') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, inner),
        };
        let name_end = inner
            .find(|c: char| c.is_ascii_whitespace() || c == '/')
            .unwrap_or(inner.len());
        let name = inner[..name_end].to_ascii_lowercase();
        let href = (name == "a")
            .then(|| attribute(&inner[name_end..], "href"))
            .flatten()
            .map(|v| decode_entities(&v));
        Self { name, closing, href }
    }
}

/// Value of `name="..."`, `name='...'` or `name=bare` inside a tag.
fn attribute(attrs: &str, name: &str) -> Option<String> {
    let lower = attrs.to_ascii_lowercase();
    let mut from = 0;
    while let Some(pos) = lower[from..].find(name) {
        let start = from + pos;
        from = start + name.len();
        let preceded_ok = start == 0 || lower.as_bytes()[start - 1].is_ascii_whitespace();
        let value = attrs[from..].trim_start();
        let Some(value) = value.strip_prefix('=').filter(|_| preceded_ok) else {
            continue;
        };
        let value = value.trim_start();
        return Some(match value.chars().next() {
            Some(q @ ('"' | '\'')) => value[1..].split(q).next().unwrap_or("").to_string(),
            _ => value
                .split(|c: char| c.is_ascii_whitespace())
                .next()
                .unwrap_or("")
                .to_string(),
        });
    }
    None
}

/// Continue after the matching `</name ...>`, or at the end when it never closes.
fn skip_past_close<'a>(rest: &'a str, name: &str) -> &'a str {
    let needle = format!("</{name}");
    // ASCII lowercasing keeps byte offsets valid for the original string.
    match rest.to_ascii_lowercase().find(&needle) {
        Some(pos) => rest[pos..].find('>').map_or("", |end| &rest[pos + end + 1..]),
        None => "",
    }
}

fn push_decoded(out: &mut String, text: &str) {
    out.push_str(&decode_entities(text));
}

/// Decode the common named entities and numeric references in one pass, so
/// `&amp;lt;` stays a literal `&lt;`.
fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp + 1..];
        let decoded = candidate
            .find(';')
            .filter(|&end| end <= 8)
            .and_then(|end| entity(&candidate[..end]).map(|ch| (ch, end)));
        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &candidate[end + 1..];
            }
            None => {
                out.push('&');
                rest = candidate;
            }
        }
    }
    out.push_str(rest);
    out
}

fn entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = match name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => name.strip_prefix('#')?.parse().ok()?,
            };
            match char::from_u32(code)? {
                '\u{a0}' => Some(' '),
                ch => Some(ch),
            }
        }
    }
}

/// Trim every line and keep at most one blank line between paragraphs.
fn collapse_blank_lines(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut prev_was_blank = false;
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            if !prev_was_blank {
                cleaned.push('\n');
            }
            prev_was_blank = true;
        } else {
            cleaned.push_str(line);
            cleaned.push('\n');
            prev_was_blank = false;
        }
    }
    cleaned.trim().to_string()
}
