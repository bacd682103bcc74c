//! Failure notification sent to the recipient when the relay rejects a
//! forwarded message.

use std::time::SystemTime;

use chrono::{DateTime, Utc};
use lettre::message::header::ContentType as LettreContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::{Address, Message};

use crate::config::Config;
use crate::error::RelayError;
use crate::export::eml::{encode_leaf, is_line_safe};
use crate::model::address::EmailAddress;
use crate::model::node::ContentType;

/// Display name used on notifications.
pub const NOTICE_SENDER_NAME: &str = "Mail Service";

/// Build the diagnostic message for a failed forward of `message_id`.
///
/// With `original` the notice becomes `multipart/mixed` and carries the raw
/// source as `<message_id>.eml`: typed `message/rfc822` when it can travel
/// unencoded, `application/octet-stream` otherwise.
pub fn failure_notice(
    config: &Config,
    message_id: &str,
    reason: &str,
    original: Option<&[u8]>,
    date: DateTime<Utc>,
) -> Result<Message, RelayError> {
    let builder = Message::builder()
        .from(mailbox(&config.sender_address().named(NOTICE_SENDER_NAME))?)
        .to(mailbox(&config.recipient_address())?)
        .subject(format!("Failed to forward {message_id}"))
        .date(SystemTime::from(date));
    let text = SinglePart::plain(notice_text(message_id, reason));

    let message = match original {
        None => builder.singlepart(text),
        Some(raw) => {
            let mime_type = if is_line_safe(raw) {
                "message/rfc822"
            } else {
                "application/octet-stream"
            };
            let content_type = LettreContentType::parse(mime_type)
                .map_err(|e| RelayError(format!("notice attachment type: {e}")))?;
            let body = encode_leaf(&ContentType::new(mime_type), raw);
            let attachment = Attachment::new(format!("{message_id}.eml")).body(body, content_type);
            builder.multipart(MultiPart::mixed().singlepart(text).singlepart(attachment))
        }
    };
    message.map_err(|e| RelayError(format!("cannot build failure notice: {e}")))
}

fn mailbox(address: &EmailAddress) -> Result<Mailbox, RelayError> {
    let email: Address = address
        .address
        .parse()
        .map_err(|e| RelayError(format!("invalid notice address '{}': {e}", address.address)))?;
    let name = Some(address.display_name.clone()).filter(|n| !n.is_empty());
    Ok(Mailbox::new(name, email))
}

fn notice_text(message_id: &str, reason: &str) -> String {
    format!(
        "The message {message_id} could not be forwarded.\n\n\
Relay error:\n{reason}\n\n\
The original message was moved to the error location.\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::mime::parse;
    use chrono::TimeZone;

    fn config() -> Config {
        let mut config = Config::default();
        config.forward.sender = "forwarder@relay.example".into();
        config.forward.recipient = "Me <me@example.com>".into();
        config
    }

    fn date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_notice_headers_and_body() {
        let notice = failure_notice(&config(), "abc123", "Throttled: Maximum sending rate exceeded", None, date())
            .unwrap();
        let node = parse(&notice.formatted()).unwrap();
        let h = node.headers();
        assert_eq!(h.get("from").as_deref(), Some("Mail Service <forwarder@relay.example>"));
        assert_eq!(h.get("to").as_deref(), Some("Me <me@example.com>"));
        assert_eq!(h.get("subject").as_deref(), Some("Failed to forward abc123"));
        assert_eq!(h.get("date").as_deref(), Some("Fri, 01 Mar 2024 12:00:00 +0000"));
        assert!(!node.is_container());
        let body = String::from_utf8(node.payload().unwrap().to_vec()).unwrap();
        assert!(body.contains("Throttled: Maximum sending rate exceeded"));
        assert!(body.contains("abc123 could not be forwarded"));
    }

    #[test]
    fn test_notice_attaches_original() {
        let raw = b"From: a@example.com\r\nSubject: x\r\n\r\nhello\r\n";
        let notice = failure_notice(&config(), "abc123", "Throttled", Some(raw), date()).unwrap();
        let node = parse(&notice.formatted()).unwrap();
        assert_eq!(node.content_type().mime_type(), "multipart/mixed");
        assert_eq!(node.children()[0].content_type().mime_type(), "text/plain");
        let attachment = &node.children()[1];
        assert_eq!(attachment.content_type().mime_type(), "message/rfc822");
        assert_eq!(attachment.disposition().unwrap().mime_type(), "attachment");
        assert_eq!(attachment.disposition().unwrap().param("filename"), Some("abc123.eml"));
        assert!(attachment.payload().unwrap().starts_with(b"From: a@example.com\r\nSubject: x"));
    }

    #[test]
    fn test_notice_unsafe_original_is_opaque() {
        let mut raw = b"Subject: long\r\n\r\n".to_vec();
        raw.extend(std::iter::repeat(b'x').take(2000));
        let notice = failure_notice(&config(), "m", "err", Some(&raw), date()).unwrap();
        let formatted = notice.formatted();
        let node = parse(&formatted).unwrap();
        let attachment = &node.children()[1];
        assert_eq!(attachment.content_type().mime_type(), "application/octet-stream");
        assert_eq!(attachment.payload(), Some(&raw[..]));
    }

    #[test]
    fn test_notice_rejects_unusable_recipient() {
        let mut config = config();
        config.forward.recipient = "not an address".into();
        assert!(failure_notice(&config, "m", "err", None, date()).is_err());
    }
}
