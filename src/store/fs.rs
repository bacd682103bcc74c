//! Local directory blob store.
//!
//! Each bucket is a directory under the root and each key a relative path
//! inside it. Retrieval links carry an HMAC-SHA256 over bucket, key and
//! expiry, checked with [`FsBlobStore::verify_link`] by whatever serves the
//! files.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{encode_key, BlobStore};
use crate::error::StoreError;

type HmacSha256 = Hmac<Sha256>;

pub struct FsBlobStore {
    root: PathBuf,
    link_base_url: String,
    link_secret: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, link_base_url: &str, link_secret: &str) -> Self {
        Self {
            root: root.into(),
            link_base_url: link_base_url.trim_end_matches('/').to_string(),
            link_secret: link_secret.to_string(),
        }
    }

    /// Link to `bucket/key` valid until the unix time `expires`.
    pub fn presign_at(&self, bucket: &str, key: &str, expires: i64) -> String {
        format!(
            "{}/{}/{}?expires={}&signature={}",
            self.link_base_url,
            encode_key(bucket),
            encode_key(key),
            expires,
            self.signature(bucket, key, expires)
        )
    }

    /// Check a link's signature and that it has not expired at `now`.
    /// The signature comparison runs in constant time.
    pub fn verify_link(&self, bucket: &str, key: &str, expires: i64, signature: &str, now: i64) -> bool {
        if now > expires {
            return false;
        }
        match (decode_hex(signature), self.mac(bucket, key, expires)) {
            (Some(tag), Some(mac)) => mac.verify_slice(&tag).is_ok(),
            _ => false,
        }
    }

    fn signature(&self, bucket: &str, key: &str, expires: i64) -> String {
        self.mac(bucket, key, expires)
            .map(|mac| format!("{:x}", mac.finalize().into_bytes()))
            .unwrap_or_default()
    }

    fn mac(&self, bucket: &str, key: &str, expires: i64) -> Option<HmacSha256> {
        // HMAC takes keys of any length, so this only fails on a broken build.
        let mut mac = HmacSha256::new_from_slice(self.link_secret.as_bytes()).ok()?;
        mac.update(bucket.as_bytes());
        mac.update(b"\n");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Some(mac)
    }

    /// Resolve `bucket/key` below the root, refusing anything that could
    /// escape it.
    fn object_path(&self, op: &'static str, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        let invalid = |reason: &str| StoreError::new(op, bucket, key, reason);

        if !is_plain_segment(bucket) {
            return Err(invalid("invalid bucket name"));
        }
        if key.is_empty() || key.contains('\\') {
            return Err(invalid("invalid key"));
        }

        let mut path = self.root.join(bucket);
        for component in Path::new(key).components() {
            match component {
                Component::Normal(segment) => path.push(segment),
                _ => return Err(invalid("key must be a relative path without '.' or '..'")),
            }
        }
        Ok(path)
    }
}

fn is_plain_segment(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\'])
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    s.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            Some((hi * 16 + lo) as u8)
        })
        .collect()
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) => std::fs::create_dir_all(parent),
        None => Ok(()),
    }
}

impl BlobStore for FsBlobStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path("get", bucket, key)?;
        std::fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::new("get", bucket, key, "NoSuchKey"),
            _ => StoreError::new("get", bucket, key, e),
        })
    }

    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.object_path("put", bucket, key)?;
        ensure_parent(&path)
            .and_then(|()| std::fs::write(&path, bytes))
            .map_err(|e| StoreError::new("put", bucket, key, e))
    }

    fn copy(&self, bucket: &str, src_key: &str, dst_key: &str) -> Result<(), StoreError> {
        let src = self.object_path("copy", bucket, src_key)?;
        let dst = self.object_path("copy", bucket, dst_key)?;
        ensure_parent(&dst)
            .and_then(|()| std::fs::copy(&src, &dst))
            .map(|_| ())
            .map_err(|e| StoreError::new("copy", bucket, src_key, e))
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let path = self.object_path("delete", bucket, key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::new("delete", bucket, key, e)),
        }
    }

    fn presigned_url(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String, StoreError> {
        self.object_path("presign", bucket, key)?;
        let ttl = i64::try_from(ttl.as_secs())
            .map_err(|_| StoreError::new("presign", bucket, key, "expiry out of range"))?;
        Ok(self.presign_at(bucket, key, Utc::now().timestamp() + ttl))
    }
}
