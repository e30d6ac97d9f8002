//! Storage client interface
//!
//! Narrow, idempotent bucket primitives the reconciler needs from an
//! S3-compatible backend. Wire-level clients implement [`StorageClient`].

use std::fmt::Debug;

use async_trait::async_trait;

use crate::crd::{
    BucketLifecycleConfiguration, BucketParameters, ObjectLockConfiguration,
    VersioningConfiguration,
};
use crate::error::Result;

/// Bucket-level operations against one S3-compatible backend
#[async_trait]
pub trait StorageClient: Send + Sync + Debug {
    /// Check whether the bucket exists
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// Create the bucket; an existing bucket owned by the caller yields
    /// [`Error::BucketAlreadyOwned`](crate::Error::BucketAlreadyOwned)
    async fn create_bucket(&self, bucket: &str, params: &BucketParameters) -> Result<()>;

    /// Delete the bucket; a missing bucket yields
    /// [`Error::BucketNotFound`](crate::Error::BucketNotFound)
    async fn delete_bucket(&self, bucket: &str) -> Result<()>;

    async fn put_bucket_lifecycle_configuration(
        &self,
        bucket: &str,
        config: &BucketLifecycleConfiguration,
    ) -> Result<()>;

    async fn delete_bucket_lifecycle_configuration(&self, bucket: &str) -> Result<()>;

    async fn put_bucket_versioning(
        &self,
        bucket: &str,
        config: &VersioningConfiguration,
    ) -> Result<()>;

    async fn put_object_lock_configuration(
        &self,
        bucket: &str,
        config: &ObjectLockConfiguration,
    ) -> Result<()>;

    async fn put_bucket_acl(&self, bucket: &str, acl: &str) -> Result<()>;
}
