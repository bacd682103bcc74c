//! One forwarding invocation, from inbox object to archived original.
//!
//! ```text
//! fetch → parse → [classify → relocate → rebuild] → rewrite → send
//!                                                              ├─ ok:  move to archive
//!                                                              └─ err: move to error, notify
//! ```
//!
//! Fetch and parse failures abort before any side effect, leaving the
//! message in the inbox. Everything after that is contained: relocation
//! failures drop a link, move failures are logged, and a failed send still
//! completes the error branch.

use std::fmt;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{ForwardError, Result};
use crate::export::eml;
use crate::model::node::MimeNode;
use crate::parser::mime;
use crate::relay::MailRelay;
use crate::store::{move_object, BlobStore};
use crate::transform::classify::classify;
use crate::transform::notice::failure_notice;
use crate::transform::rebuild::rebuild;
use crate::transform::relocate::Relocator;
use crate::transform::rewrite::HeaderRewriter;

/// Terminal state of an invocation that got past fetch and parse.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The relay accepted the message.
    Forwarded {
        summary: String,
        /// Attachment links placed in the rebuilt body.
        links: usize,
        /// The source was moved to the archive location.
        archived: bool,
    },
    /// The relay rejected the message.
    Failed {
        reason: String,
        /// The diagnostic message was accepted by the relay.
        notified: bool,
        /// The source was moved to the error location.
        archived: bool,
    },
}

impl Outcome {
    pub fn is_forwarded(&self) -> bool {
        matches!(self, Self::Forwarded { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forwarded { summary, .. } => f.write_str(summary),
            Self::Failed { reason, .. } => write!(f, "Forwarding failed: {reason}"),
        }
    }
}

/// Runs invocations against one configuration, store and relay.
pub struct Forwarder<'a> {
    config: &'a Config,
    store: &'a dyn BlobStore,
    relay: &'a dyn MailRelay,
    rewriter: HeaderRewriter,
}

impl<'a> Forwarder<'a> {
    pub fn new(config: &'a Config, store: &'a dyn BlobStore, relay: &'a dyn MailRelay) -> Self {
        Self {
            config,
            store,
            relay,
            rewriter: HeaderRewriter::from_config(config),
        }
    }

    /// Forward the inbox message `message_id`.
    pub fn forward(&self, message_id: &str) -> Result<Outcome> {
        info!(message_id = message_id, "Received message");
        let storage = &self.config.storage;

        let raw = self
            .store
            .get(&storage.bucket, &storage.inbox_key(message_id))
            .map_err(|source| ForwardError::Fetch {
                message_id: message_id.to_string(),
                source,
            })?;
        let original = mime::parse(&raw)?;

        let (message, links) = self.prepare(message_id, original);
        let rewritten = self.rewriter.rewrite(message);
        let headers = rewritten.message.headers();
        info!(
            message_id = message_id,
            original_from = %rewritten.original_from,
            from = %headers.get("from").unwrap_or_default(),
            reply_to = %headers.get("reply-to").unwrap_or_default(),
            return_path = %headers.get("return-path").unwrap_or_default(),
            "Forwarding message"
        );

        let bytes = eml::to_bytes(&rewritten.message);
        let recipients = [self.config.recipient_address().address];

        match self.relay.send_raw(&recipients, &bytes) {
            Ok(()) => {
                let summary = format!(
                    "Email from {} was forwarded to {} by {}",
                    rewritten.original_from.trim(),
                    self.config.forward.recipient,
                    self.config.forward.sender
                );
                info!(message_id = message_id, "{summary}");
                let archived = self.move_to(message_id, &storage.archive_prefix);
                Ok(Outcome::Forwarded {
                    summary,
                    links,
                    archived,
                })
            }
            Err(e) => {
                let reason = e.0.clone();
                warn!(message_id = message_id, error = %ForwardError::Send(e), "Relay rejected message");
                let archived = self.move_to(message_id, &storage.error_prefix);
                let notified = self.notify(message_id, &reason, &raw);
                Ok(Outcome::Failed {
                    reason,
                    notified,
                    archived,
                })
            }
        }
    }

    /// Relocate attachments and rebuild the body when enabled; otherwise the
    /// parsed tree goes out as is. Returns the message and its link count.
    fn prepare(&self, message_id: &str, original: MimeNode) -> (MimeNode, usize) {
        if !self.config.policy.relocate_attachments {
            return (original, 0);
        }
        let parts = classify(&original);
        let links = Relocator::new(
            self.store,
            &self.config.storage,
            self.config.policy.duplicate_filenames,
        )
        .relocate_all(message_id, &parts);
        (rebuild(&original, &parts, &links), links.len())
    }

    /// Move the source out of the inbox. Failures are logged only.
    fn move_to(&self, message_id: &str, prefix: &str) -> bool {
        let storage = &self.config.storage;
        let destination = storage.moved_key(prefix, message_id);
        match move_object(
            self.store,
            &storage.bucket,
            &storage.inbox_key(message_id),
            &destination,
        ) {
            Ok(()) => {
                info!(message_id = message_id, destination = %destination, "Moved message");
                true
            }
            Err(source) => {
                let e = ForwardError::Archive {
                    message_id: message_id.to_string(),
                    destination,
                    source,
                };
                error!(error = %e, "Could not move message");
                false
            }
        }
    }

    /// Tell the recipient the forward failed. Failures are logged only.
    fn notify(&self, message_id: &str, reason: &str, raw: &[u8]) -> bool {
        let original = self
            .config
            .policy
            .attach_original_on_failure
            .then_some(raw);
        let notice = match failure_notice(self.config, message_id, reason, original, Utc::now()) {
            Ok(notice) => notice,
            Err(e) => {
                error!(message_id = message_id, error = %e, "Failure notice could not be built");
                return false;
            }
        };
        let recipients = [self.config.recipient_address().address];

        match self.relay.send_raw(&recipients, &notice.formatted()) {
            Ok(()) => {
                info!(
                    message_id = message_id,
                    recipient = %self.config.forward.recipient,
                    "Sent failure notice"
                );
                true
            }
            Err(e) => {
                error!(message_id = message_id, error = %e, "Failure notice could not be sent");
                false
            }
        }
    }
}
