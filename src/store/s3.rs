//! Amazon S3 blob store.
//!
//! The SDK is async; each call is driven to completion on a private
//! current-thread runtime so callers stay synchronous.

use std::time::Duration;

use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use tokio::runtime::Runtime;

use super::{encode_key, BlobStore};
use crate::error::StoreError;

pub struct S3BlobStore {
    runtime: Runtime,
    client: aws_sdk_s3::Client,
}

impl S3BlobStore {
    /// Build a client from the standard AWS environment (region, credentials).
    pub fn connect() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let sdk_config =
            runtime.block_on(aws_config::load_defaults(aws_config::BehaviorVersion::latest()));
        Ok(Self {
            client: aws_sdk_s3::Client::new(&sdk_config),
            runtime,
        })
    }
}

impl BlobStore for S3BlobStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.runtime.block_on(async {
            let object = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| StoreError::new("get", bucket, key, DisplayErrorContext(&e)))?;
            let data = object
                .body
                .collect()
                .await
                .map_err(|e| StoreError::new("get", bucket, key, e))?;
            Ok(data.into_bytes().to_vec())
        })
    }

    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.runtime.block_on(async {
            self.client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(ByteStream::from(bytes.to_vec()))
                .send()
                .await
                .map_err(|e| StoreError::new("put", bucket, key, DisplayErrorContext(&e)))?;
            Ok(())
        })
    }

    fn copy(&self, bucket: &str, src_key: &str, dst_key: &str) -> Result<(), StoreError> {
        self.runtime.block_on(async {
            self.client
                .copy_object()
                .bucket(bucket)
                .copy_source(format!("{}/{}", bucket, encode_key(src_key)))
                .key(dst_key)
                .send()
                .await
                .map_err(|e| StoreError::new("copy", bucket, src_key, DisplayErrorContext(&e)))?;
            Ok(())
        })
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.runtime.block_on(async {
            self.client
                .delete_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| StoreError::new("delete", bucket, key, DisplayErrorContext(&e)))?;
            Ok(())
        })
    }

    fn presigned_url(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String, StoreError> {
        let presigning =
            PresigningConfig::expires_in(ttl).map_err(|e| StoreError::new("presign", bucket, key, e))?;
        self.runtime.block_on(async {
            let request = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .presigned(presigning)
                .await
                .map_err(|e| StoreError::new("presign", bucket, key, DisplayErrorContext(&e)))?;
            Ok(request.uri().to_string())
        })
    }
}
