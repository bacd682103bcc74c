//! End-to-end forwarding tests against in-memory storage and a recording relay.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use mailfwd::config::{Config, DuplicateFilenames};
use mailfwd::error::{ForwardError, RelayError, StoreError};
use mailfwd::forward::{Forwarder, Outcome};
use mailfwd::model::node::MimeNode;
use mailfwd::parser::mime::parse;
use mailfwd::relay::MailRelay;
use mailfwd::store::BlobStore;

fn fixture(name: &str) -> Vec<u8> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()))
}

// ── Test doubles ────────────────────────────────────────────────

#[derive(Default)]
struct MemoryStore {
    objects: RefCell<BTreeMap<(String, String), Vec<u8>>>,
    fail_copy: bool,
    fail_put_containing: Option<&'static str>,
}

impl MemoryStore {
    fn with_message(id: &str, raw: &[u8]) -> Self {
        let store = Self::default();
        store.insert(&format!("inbox/{id}"), raw);
        store
    }

    fn insert(&self, key: &str, bytes: &[u8]) {
        self.objects
            .borrow_mut()
            .insert(("mail".to_string(), key.to_string()), bytes.to_vec());
    }

    fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .borrow()
            .get(&("mail".to_string(), key.to_string()))
            .cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.objects.borrow().keys().map(|(_, k)| k.clone()).collect()
    }
}

impl BlobStore for MemoryStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.objects
            .borrow()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::new("get", bucket, key, "NoSuchKey"))
    }

    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        if self.fail_put_containing.is_some_and(|f| key.contains(f)) {
            return Err(StoreError::new("put", bucket, key, "AccessDenied"));
        }
        self.objects
            .borrow_mut()
            .insert((bucket.to_string(), key.to_string()), bytes.to_vec());
        Ok(())
    }

    fn copy(&self, bucket: &str, src_key: &str, dst_key: &str) -> Result<(), StoreError> {
        if self.fail_copy {
            return Err(StoreError::new("copy", bucket, src_key, "AccessDenied"));
        }
        let bytes = self.get(bucket, src_key)?;
        self.put(bucket, dst_key, &bytes)
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.objects
            .borrow_mut()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    fn presigned_url(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String, StoreError> {
        Ok(format!("https://blobs.test/{bucket}/{key}?ttl={}", ttl.as_secs()))
    }
}

/// Records every send attempt; answers from `responses` in order, then Ok.
#[derive(Default)]
struct RecordingRelay {
    sent: RefCell<Vec<(Vec<String>, Vec<u8>)>>,
    responses: RefCell<VecDeque<Result<(), RelayError>>>,
}

impl RecordingRelay {
    fn failing(reasons: &[&str]) -> Self {
        let relay = Self::default();
        relay.responses.borrow_mut().extend(
            reasons
                .iter()
                .map(|r| Err(RelayError(r.to_string()))),
        );
        relay
    }

    fn message(&self, index: usize) -> MimeNode {
        parse(&self.sent.borrow()[index].1).unwrap()
    }
}

impl MailRelay for RecordingRelay {
    fn send_raw(&self, recipients: &[String], raw: &[u8]) -> Result<(), RelayError> {
        self.sent
            .borrow_mut()
            .push((recipients.to_vec(), raw.to_vec()));
        self.responses.borrow_mut().pop_front().unwrap_or(Ok(()))
    }
}

fn config() -> Config {
    let mut config = Config::default();
    config.forward.recipient = "me@example.com".into();
    config.forward.sender = "forwarder@relay.example".into();
    config.storage.bucket = "mail".into();
    config.storage.inbox_prefix = "inbox".into();
    config.storage.archive_prefix = "archive".into();
    config.storage.error_prefix = "error".into();
    config
}

fn text(node: &MimeNode) -> String {
    String::from_utf8(node.payload().unwrap().to_vec()).unwrap()
}

// ── Scenarios ───────────────────────────────────────────────────

#[test]
fn test_plain_message_with_attachment_gets_link() {
    let raw = fixture("plain_with_attachment.eml");
    let store = MemoryStore::with_message("m-a", &raw);
    let relay = RecordingRelay::default();
    let config = config();

    let outcome = Forwarder::new(&config, &store, &relay).forward("m-a").unwrap();
    assert!(matches!(outcome, Outcome::Forwarded { links: 1, archived: true, .. }));

    let stored = store.object("attachments/m-a/report.pdf").unwrap();
    assert!(stored.starts_with(b"%PDF-1.4\n"));
    assert!(stored.ends_with(b"%%EOF\n"));

    let sent = relay.message(0);
    assert_eq!(sent.content_type().mime_type(), "multipart/alternative");
    let plain = text(&sent.children()[0]);
    let html = text(&sent.children()[1]);
    assert_eq!(
        plain,
        "Quarterly numbers attached.\r\nGrowth < 5% & steady.\r\n\r\nAttachments:\r\n\
- report.pdf <https://blobs.test/mail/attachments/m-a/report.pdf?ttl=604800>"
    );
    assert!(html.starts_with("<pre>Quarterly numbers attached.\r\nGrowth &lt; 5% &amp; steady.</pre>"));
    assert!(html.ends_with(
        "<ul><li><a href=\"https://blobs.test/mail/attachments/m-a/report.pdf?ttl=604800\">report.pdf</a></li></ul>"
    ));
    // The PDF itself no longer travels with the message
    assert_eq!(sent.leaf_count(), 2);
}

#[test]
fn test_html_with_inline_image_keeps_related_structure() {
    let raw = fixture("html_inline_image.eml");
    let original = parse(&raw).unwrap();
    let store = MemoryStore::with_message("m-b", &raw);
    let relay = RecordingRelay::default();
    let config = config();

    let outcome = Forwarder::new(&config, &store, &relay).forward("m-b").unwrap();
    assert!(matches!(outcome, Outcome::Forwarded { links: 0, .. }));

    let sent = relay.message(0);
    assert_eq!(sent.content_type().mime_type(), "multipart/related");
    let alternative = &sent.children()[0];
    assert_eq!(alternative.content_type().mime_type(), "multipart/alternative");

    let html = text(&alternative.children()[1]);
    assert_eq!(
        html,
        "<html><body><p>Spring offers \u{2014} see below</p><img src=\"cid:logo@shop\"></body></html>"
    );
    assert!(!html.contains("<ul>"));
    assert_eq!(text(&alternative.children()[0]), "Spring offers \u{2014} see below");

    let image = &sent.children()[1];
    let original_image = &original.children()[1];
    assert_eq!(image.content_type().mime_type(), "image/png");
    assert_eq!(image.headers().get("content-id").as_deref(), Some("<logo@shop>"));
    assert_eq!(image.payload(), original_image.payload());
    assert!(store.keys().iter().all(|k| !k.starts_with("attachments/")));
}

#[test]
fn test_send_failure_notifies_and_moves_to_error() {
    let raw = fixture("plain_text.eml");
    let store = MemoryStore::with_message("m-c", &raw);
    let relay = RecordingRelay::failing(&["Throttled"]);
    let config = config();

    let outcome = Forwarder::new(&config, &store, &relay).forward("m-c").unwrap();
    assert_eq!(
        outcome,
        Outcome::Failed {
            reason: "Throttled".into(),
            notified: true,
            archived: true,
        }
    );

    assert_eq!(store.object("error/m-c.eml"), Some(raw.clone()));
    assert!(store.object("inbox/m-c").is_none());
    assert!(store.object("archive/m-c.eml").is_none());

    let sent = relay.sent.borrow();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].0, vec!["me@example.com".to_string()]);
    drop(sent);

    let notice = relay.message(1);
    let h = notice.headers();
    assert_eq!(h.get("subject").as_deref(), Some("Failed to forward m-c"));
    assert_eq!(h.get("from").as_deref(), Some("Mail Service <forwarder@relay.example>"));
    assert_eq!(h.get("to").as_deref(), Some("me@example.com"));
    assert!(h.contains("date"));

    assert_eq!(notice.content_type().mime_type(), "multipart/mixed");
    assert!(text(&notice.children()[0]).contains("Throttled"));
    let attached = &notice.children()[1];
    assert_eq!(attached.content_type().mime_type(), "message/rfc822");
    assert!(text(attached).contains("Subject: Lunch?"));
}

#[test]
fn test_notice_without_original_when_disabled() {
    let raw = fixture("plain_text.eml");
    let store = MemoryStore::with_message("m-c2", &raw);
    let relay = RecordingRelay::failing(&["Message rejected: Email address is not verified."]);
    let mut config = config();
    config.policy.attach_original_on_failure = false;

    Forwarder::new(&config, &store, &relay).forward("m-c2").unwrap();

    let notice = relay.message(1);
    assert!(!notice.is_container());
    assert!(text(&notice).contains("Email address is not verified."));
}

#[test]
fn test_successful_send_archives_original() {
    let raw = fixture("plain_text.eml");
    let store = MemoryStore::with_message("m-d", &raw);
    let relay = RecordingRelay::default();
    let config = config();

    let outcome = Forwarder::new(&config, &store, &relay).forward("m-d").unwrap();
    match &outcome {
        Outcome::Forwarded { summary, archived, .. } => {
            assert!(archived);
            assert_eq!(
                summary,
                "Email from Bob <bob@example.net> was forwarded to me@example.com by forwarder@relay.example"
            );
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert_eq!(store.object("archive/m-d.eml"), Some(raw));
    assert!(store.object("inbox/m-d").is_none());

    let sent = relay.sent.borrow();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, vec!["me@example.com".to_string()]);
    drop(sent);

    let message = relay.message(0);
    let h = message.headers();
    assert!(!h.contains("dkim-signature"));
    assert_eq!(h.get("from").as_deref(), Some("Bob <forwarder@relay.example>"));
    assert_eq!(h.get_all("reply-to").collect::<Vec<_>>(), vec!["Bob <bob@example.net>"]);
    assert_eq!(h.get("return-path").as_deref(), Some("<forwarder@relay.example>"));
    assert_eq!(h.get("mime-version").as_deref(), Some("1.0"));
    assert_eq!(h.get_all("content-type").count(), 1);
}

// ── Error paths ─────────────────────────────────────────────────

#[test]
fn test_missing_message_is_fatal_without_side_effects() {
    let store = MemoryStore::default();
    let relay = RecordingRelay::default();
    let config = config();

    let err = Forwarder::new(&config, &store, &relay)
        .forward("nope")
        .unwrap_err();
    assert!(matches!(err, ForwardError::Fetch { .. }));
    assert!(relay.sent.borrow().is_empty());
    assert!(store.keys().is_empty());
}

#[test]
fn test_malformed_message_stays_in_inbox() {
    let store = MemoryStore::with_message("bad", b"\r\n\r\nno headers at all");
    let relay = RecordingRelay::default();
    let config = config();

    let err = Forwarder::new(&config, &store, &relay)
        .forward("bad")
        .unwrap_err();
    assert!(matches!(err, ForwardError::Parse(_)));
    assert!(relay.sent.borrow().is_empty());
    assert_eq!(store.keys(), vec!["inbox/bad".to_string()]);
}

#[test]
fn test_archive_failure_does_not_change_outcome() {
    let raw = fixture("plain_text.eml");
    let store = MemoryStore {
        fail_copy: true,
        ..MemoryStore::with_message("m-e", &raw)
    };
    let relay = RecordingRelay::default();
    let config = config();

    let outcome = Forwarder::new(&config, &store, &relay).forward("m-e").unwrap();
    assert!(matches!(outcome, Outcome::Forwarded { archived: false, .. }));
    assert_eq!(relay.sent.borrow().len(), 1);
    assert!(store.object("inbox/m-e").is_some());
}

#[test]
fn test_failed_notice_still_moves_to_error() {
    let raw = fixture("plain_text.eml");
    let store = MemoryStore::with_message("m-f", &raw);
    let relay = RecordingRelay::failing(&["Throttled", "Throttled"]);
    let config = config();

    let outcome = Forwarder::new(&config, &store, &relay).forward("m-f").unwrap();
    assert!(matches!(
        outcome,
        Outcome::Failed {
            notified: false,
            archived: true,
            ..
        }
    ));
    assert!(store.object("error/m-f.eml").is_some());
}

#[test]
fn test_failed_relocation_drops_only_that_link() {
    let raw = fixture("plain_with_attachment.eml");
    let store = MemoryStore {
        fail_put_containing: Some("report.pdf"),
        ..MemoryStore::with_message("m-g", &raw)
    };
    let relay = RecordingRelay::default();
    let config = config();

    let outcome = Forwarder::new(&config, &store, &relay).forward("m-g").unwrap();
    assert!(matches!(outcome, Outcome::Forwarded { links: 0, .. }));
    let html = text(&relay.message(0).children()[1]);
    assert!(!html.contains("<ul>"));
}

// ── Policy switches ─────────────────────────────────────────────

#[test]
fn test_relocation_disabled_forwards_structure_unchanged() {
    let raw = fixture("plain_with_attachment.eml");
    let original = parse(&raw).unwrap();
    let store = MemoryStore::with_message("m-h", &raw);
    let relay = RecordingRelay::default();
    let mut config = config();
    config.policy.relocate_attachments = false;
    config.policy.duplicate_filenames = DuplicateFilenames::Index;

    Forwarder::new(&config, &store, &relay).forward("m-h").unwrap();

    let sent = relay.message(0);
    assert_eq!(sent.content_type().mime_type(), "multipart/mixed");
    assert_eq!(sent.children()[1].payload(), original.children()[1].payload());
    assert_eq!(sent.headers().get("subject").as_deref(), Some("Q3 report"));
    assert!(store.keys().iter().all(|k| !k.starts_with("attachments/")));
}

#[test]
fn test_no_header_value_contains_line_breaks() {
    let raw = fixture("plain_with_attachment.eml");
    let store = MemoryStore::with_message("m-i", &raw);
    let relay = RecordingRelay::default();
    let config = config();

    Forwarder::new(&config, &store, &relay).forward("m-i").unwrap();

    let message = relay.message(0);
    assert!(message
        .headers()
        .iter()
        .all(|(_, v)| !v.contains(&b'\r') && !v.contains(&b'\n')));
}
