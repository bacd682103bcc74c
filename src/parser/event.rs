//! Trigger event decoding.
//!
//! The inbound-mail notification is opaque apart from one field: the message
//! identifier at `Records[0].ses.mail.messageId`.

use serde::Deserialize;

use crate::error::{ForwardError, Result};

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Event {
    #[serde(default)]
    records: Vec<Record>,
}

#[derive(Deserialize)]
struct Record {
    ses: Option<SesPayload>,
}

#[derive(Deserialize)]
struct SesPayload {
    mail: Option<Mail>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Mail {
    message_id: Option<String>,
}

/// Extract the message identifier from a trigger event JSON payload.
pub fn message_id_from_event(payload: &str) -> Result<String> {
    let event: Event =
        serde_json::from_str(payload).map_err(|e| ForwardError::Event(e.to_string()))?;

    event
        .records
        .into_iter()
        .next()
        .and_then(|r| r.ses)
        .and_then(|s| s.mail)
        .and_then(|m| m.message_id)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ForwardError::Event("missing Records[0].ses.mail.messageId".into()))
}
