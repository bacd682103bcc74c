//! Attachment relocation: persist attachment bytes in the blob store and hand
//! back an expiring retrieval link for each.
//!
//! Failures are per attachment. A part that cannot be stored or linked is
//! logged and dropped from the link list; delivery goes on without it.

use std::collections::HashSet;

use tracing::{info, warn};

use crate::config::{DuplicateFilenames, StorageConfig};
use crate::error::{ForwardError, Result};
use crate::model::part::{AttachmentLink, ClassifiedPart, PartRole, LINK_EXPIRY};
use crate::store::BlobStore;

/// Stores attachments of one message under `<attachments prefix>/<message id>/`.
pub struct Relocator<'a> {
    store: &'a dyn BlobStore,
    storage: &'a StorageConfig,
    duplicates: DuplicateFilenames,
}

impl<'a> Relocator<'a> {
    pub fn new(
        store: &'a dyn BlobStore,
        storage: &'a StorageConfig,
        duplicates: DuplicateFilenames,
    ) -> Self {
        Self {
            store,
            storage,
            duplicates,
        }
    }

    /// Store one attachment at its deterministic key and presign a link to it.
    pub fn relocate(&self, message_id: &str, attachment: &ClassifiedPart<'_>) -> Result<AttachmentLink> {
        let filename = attachment_name(attachment);
        self.relocate_as(message_id, attachment, &filename, &sanitize_filename(&filename))
    }

    /// Relocate every `Attachment` part in encounter order.
    ///
    /// The returned links keep that order; failed parts are skipped.
    pub fn relocate_all(&self, message_id: &str, parts: &[ClassifiedPart<'_>]) -> Vec<AttachmentLink> {
        let mut links = Vec::new();
        let mut used_names: HashSet<String> = HashSet::new();

        for part in parts.iter().filter(|p| p.role == PartRole::Attachment) {
            let filename = attachment_name(part);
            let mut stored_name = sanitize_filename(&filename);
            if !used_names.insert(stored_name.clone()) {
                match self.duplicates {
                    DuplicateFilenames::Overwrite => {
                        warn!(
                            message_id = message_id,
                            filename = %filename,
                            "Duplicate attachment filename, overwriting earlier copy"
                        );
                    }
                    DuplicateFilenames::Index => {
                        stored_name = indexed_name(&stored_name, &used_names);
                        used_names.insert(stored_name.clone());
                    }
                }
            }

            match self.relocate_as(message_id, part, &filename, &stored_name) {
                Ok(link) => links.push(link),
                Err(e) => warn!(
                    message_id = message_id,
                    error = %e,
                    "Skipping attachment"
                ),
            }
        }
        links
    }

    fn relocate_as(
        &self,
        message_id: &str,
        part: &ClassifiedPart<'_>,
        filename: &str,
        stored_name: &str,
    ) -> Result<AttachmentLink> {
        let bucket = &self.storage.bucket;
        let key = format!("{}/{}", self.storage.attachment_dir(message_id), stored_name);
        let relocate_err = |source| ForwardError::Relocate {
            filename: filename.to_string(),
            source,
        };

        self.store
            .put(bucket, &key, part.payload())
            .map_err(relocate_err)?;
        let url = self
            .store
            .presigned_url(bucket, &key, LINK_EXPIRY)
            .map_err(relocate_err)?;

        info!(
            message_id = message_id,
            key = %key,
            size = part.payload().len(),
            "Relocated attachment"
        );
        Ok(AttachmentLink {
            filename: filename.to_string(),
            url,
            expiry: LINK_EXPIRY,
        })
    }
}

fn attachment_name(part: &ClassifiedPart<'_>) -> String {
    part.filename
        .clone()
        .unwrap_or_else(|| "attachment.bin".to_string())
}

/// Sanitize a filename for use as the last key segment.
///
/// Replaces characters outside `[A-Za-z0-9._@-]` (Unicode letters and digits
/// allowed) with `_` and truncates to 150 characters. Leading dots are
/// replaced so the result is never `.` or `..`.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '@' {
                c
            } else {
                '_'
            }
        })
        .take(150)
        .collect();

    let trimmed = sanitized.trim_start_matches('.');
    let leading = sanitized.len() - trimmed.len();
    let sanitized = format!("{}{}", "_".repeat(leading), trimmed);

    if sanitized.is_empty() {
        "attachment".to_string()
    } else {
        sanitized
    }
}

/// First `stem_N.ext` not yet in `used`.
fn indexed_name(name: &str, used: &HashSet<String>) -> String {
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    (1..)
        .map(|i| match ext {
            Some(ext) => format!("{stem}_{i}.{ext}"),
            None => format!("{stem}_{i}"),
        })
        .find(|candidate| !used.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}
