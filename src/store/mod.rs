//! Blob storage for source messages and relocated attachments.
//!
//! All operations are synchronous and address objects by `(bucket, key)`.
//! Two backends exist: a local directory tree ([`fs::FsBlobStore`]) and
//! Amazon S3 (`s3::S3BlobStore`, behind the `s3` feature).

pub mod fs;
#[cfg(feature = "s3")]
pub mod s3;

use std::time::Duration;

use tracing::debug;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{ConfigError, StoreError};

/// Object storage as consumed by the forwarder.
pub trait BlobStore {
    /// Read a whole object.
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Create or replace an object.
    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Server-side copy within one bucket.
    fn copy(&self, bucket: &str, src_key: &str, dst_key: &str) -> Result<(), StoreError>;

    /// Remove an object. Removing a missing object is not an error.
    fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError>;

    /// A URL granting read access to the object for `ttl`.
    fn presigned_url(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String, StoreError>;
}

/// Move an object by copying it to `dst_key` and deleting `src_key`.
///
/// A failed copy leaves the source in place; a failed delete leaves both.
pub fn move_object(
    store: &dyn BlobStore,
    bucket: &str,
    src_key: &str,
    dst_key: &str,
) -> Result<(), StoreError> {
    store.copy(bucket, src_key, dst_key)?;
    store.delete(bucket, src_key)?;
    debug!(bucket = bucket, from = src_key, to = dst_key, "Moved object");
    Ok(())
}

/// Open the configured backend.
pub fn from_config(storage: &StorageConfig) -> Result<Box<dyn BlobStore>, ConfigError> {
    match storage.backend {
        StorageBackend::Fs => {
            let root = storage
                .root
                .clone()
                .ok_or(ConfigError::Missing("storage.root"))?;
            Ok(Box::new(fs::FsBlobStore::new(
                root,
                &storage.link_base_url,
                &storage.link_secret,
            )))
        }
        #[cfg(feature = "s3")]
        StorageBackend::S3 => Ok(Box::new(s3::S3BlobStore::connect().map_err(|e| {
            ConfigError::Invalid {
                field: "storage.backend",
                reason: format!("cannot start S3 client: {e}"),
            }
        })?)),
        #[cfg(not(feature = "s3"))]
        StorageBackend::S3 => Err(ConfigError::Invalid {
            field: "storage.backend",
            reason: "built without the `s3` feature".into(),
        }),
    }
}

/// Percent-encode an object key for use in a URL path, keeping `/`.
pub fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~' | b'/') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}
