//! In-process S3-compatible storage
//!
//! Backs the `memory` backend type used for local development, and lets
//! tests inject failures and latency per operation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::crd::{
    BucketLifecycleConfiguration, BucketParameters, ObjectLockConfiguration,
    VersioningConfiguration,
};
use crate::error::{Error, Result};

use super::storage::StorageClient;

/// Operations that can be made to fail
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageOp {
    HeadBucket,
    CreateBucket,
    DeleteBucket,
    PutLifecycle,
    DeleteLifecycle,
    PutVersioning,
    PutObjectLock,
    PutAcl,
}

/// State of one stored bucket
#[derive(Clone, Debug, Default)]
pub struct MemoryBucket {
    pub params: BucketParameters,
    pub lifecycle: Option<BucketLifecycleConfiguration>,
    pub versioning: Option<VersioningConfiguration>,
    pub object_lock: Option<ObjectLockConfiguration>,
    pub acl: Option<String>,
}

/// In-memory storage client
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    buckets: RwLock<HashMap<String, MemoryBucket>>,
    faults: RwLock<HashMap<StorageOp, String>>,
    latency: RwLock<HashMap<StorageOp, Duration>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `op` fail with a storage error
    pub fn fail_on(&self, op: StorageOp, message: impl Into<String>) {
        self.faults.write().insert(op, message.into());
    }

    /// Stop failing calls of `op`
    pub fn clear_fault(&self, op: StorageOp) {
        self.faults.write().remove(&op);
    }

    /// Delay every call of `op`
    pub fn delay(&self, op: StorageOp, latency: Duration) {
        self.latency.write().insert(op, latency);
    }

    /// Insert a bucket directly, bypassing fault injection
    pub fn insert_bucket(&self, name: &str) {
        self.buckets
            .write()
            .entry(name.to_string())
            .or_default();
    }

    pub fn has_bucket(&self, name: &str) -> bool {
        self.buckets.read().contains_key(name)
    }

    /// Copy of a stored bucket
    pub fn bucket(&self, name: &str) -> Option<MemoryBucket> {
        self.buckets.read().get(name).cloned()
    }

    async fn enter(&self, op: StorageOp) -> Result<()> {
        let latency = self.latency.read().get(&op).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self.faults.read().get(&op) {
            Some(message) => Err(Error::storage(message.clone())),
            None => Ok(()),
        }
    }

    fn with_bucket<T>(&self, bucket: &str, f: impl FnOnce(&mut MemoryBucket) -> T) -> Result<T> {
        let mut buckets = self.buckets.write();
        let entry = buckets
            .get_mut(bucket)
            .ok_or_else(|| Error::BucketNotFound(bucket.to_string()))?;
        Ok(f(entry))
    }
}

#[async_trait]
impl StorageClient for InMemoryStorage {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        self.enter(StorageOp::HeadBucket).await?;
        Ok(self.has_bucket(bucket))
    }

    async fn create_bucket(&self, bucket: &str, params: &BucketParameters) -> Result<()> {
        self.enter(StorageOp::CreateBucket).await?;
        let mut buckets = self.buckets.write();
        if buckets.contains_key(bucket) {
            return Err(Error::BucketAlreadyOwned(bucket.to_string()));
        }
        buckets.insert(
            bucket.to_string(),
            MemoryBucket {
                params: params.clone(),
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.enter(StorageOp::DeleteBucket).await?;
        match self.buckets.write().remove(bucket) {
            Some(_) => Ok(()),
            None => Err(Error::BucketNotFound(bucket.to_string())),
        }
    }

    async fn put_bucket_lifecycle_configuration(
        &self,
        bucket: &str,
        config: &BucketLifecycleConfiguration,
    ) -> Result<()> {
        self.enter(StorageOp::PutLifecycle).await?;
        self.with_bucket(bucket, |b| b.lifecycle = Some(config.clone()))
    }

    async fn delete_bucket_lifecycle_configuration(&self, bucket: &str) -> Result<()> {
        self.enter(StorageOp::DeleteLifecycle).await?;
        self.with_bucket(bucket, |b| b.lifecycle = None)
    }

    async fn put_bucket_versioning(
        &self,
        bucket: &str,
        config: &VersioningConfiguration,
    ) -> Result<()> {
        self.enter(StorageOp::PutVersioning).await?;
        self.with_bucket(bucket, |b| b.versioning = Some(config.clone()))
    }

    async fn put_object_lock_configuration(
        &self,
        bucket: &str,
        config: &ObjectLockConfiguration,
    ) -> Result<()> {
        self.enter(StorageOp::PutObjectLock).await?;
        self.with_bucket(bucket, |b| b.object_lock = Some(config.clone()))
    }

    async fn put_bucket_acl(&self, bucket: &str, acl: &str) -> Result<()> {
        self.enter(StorageOp::PutAcl).await?;
        self.with_bucket(bucket, |b| b.acl = Some(acl.to_string()))
    }
}
