//! Charset decoding for display and text bodies.

use std::borrow::Cow;

use tracing::{debug, warn};

/// Read raw header bytes as text.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
pub fn decode_lossy(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            Cow::Owned(decoded.into_owned())
        }
    }
}

/// Decode bytes using a named charset, defaulting to UTF-8.
///
/// Never fails: unknown charsets and invalid sequences fall back to a lossy
/// UTF-8 decode.
pub fn decode_text(bytes: &[u8], charset: Option<&str>) -> String {
    let label = charset.map(str::trim).filter(|c| !c.is_empty()).unwrap_or("utf-8");
    match label.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" | "us-ascii" | "ascii" => String::from_utf8_lossy(bytes).into_owned(),
        _ => match encoding_rs::Encoding::for_label(label.as_bytes()) {
            Some(encoding) => {
                let (decoded, _, had_errors) = encoding.decode(bytes);
                if had_errors {
                    debug!(charset = label, "Replacement characters while decoding");
                }
                decoded.into_owned()
            }
            None => {
                warn!(charset = label, "Unknown charset, falling back to UTF-8 lossy");
                String::from_utf8_lossy(bytes).into_owned()
            }
        },
    }
}
