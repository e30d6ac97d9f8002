//! Bucket subresource handlers
//!
//! Lifecycle, versioning, object lock and ACL configuration are applied per
//! backend after the bucket itself is known to exist. Handlers run in the
//! fixed order returned by [`default_handlers`]; each one decides from the
//! bucket whether it has anything to do and records its own condition.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::debug;

use crate::adapters::StorageClient;
use crate::crd::{BackendInfo, Bucket, Condition};
use crate::error::{Error, Result};

use super::accumulator::BucketBackends;

/// Configurable aspects of a bucket tracked per backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Subresource {
    Lifecycle,
    Versioning,
    ObjectLock,
    Acl,
}

impl Subresource {
    pub fn as_str(self) -> &'static str {
        match self {
            Subresource::Lifecycle => "lifecycle configuration",
            Subresource::Versioning => "versioning configuration",
            Subresource::ObjectLock => "object lock configuration",
            Subresource::Acl => "acl",
        }
    }

    pub fn condition(self, info: &BackendInfo) -> Option<&Condition> {
        match self {
            Subresource::Lifecycle => info.lifecycle_configuration_condition.as_ref(),
            Subresource::Versioning => info.versioning_configuration_condition.as_ref(),
            Subresource::ObjectLock => info.object_lock_configuration_condition.as_ref(),
            Subresource::Acl => info.acl_condition.as_ref(),
        }
    }

    pub fn condition_mut(self, info: &mut BackendInfo) -> &mut Option<Condition> {
        match self {
            Subresource::Lifecycle => &mut info.lifecycle_configuration_condition,
            Subresource::Versioning => &mut info.versioning_configuration_condition,
            Subresource::ObjectLock => &mut info.object_lock_configuration_condition,
            Subresource::Acl => &mut info.acl_condition,
        }
    }
}

impl fmt::Display for Subresource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Applies one subresource of a bucket on one backend
#[async_trait]
pub trait SubresourceHandler: Send + Sync {
    fn subresource(&self) -> Subresource;

    /// Whether there is anything to apply for this bucket on this backend
    fn applies(&self, bucket: &Bucket, observed: Option<&BackendInfo>) -> bool;

    async fn handle(
        &self,
        bucket: &Bucket,
        backend: &str,
        client: &dyn StorageClient,
        backends: &BucketBackends,
    ) -> Result<()>;
}

/// Handlers in the order they run during Update
pub fn default_handlers() -> Vec<Arc<dyn SubresourceHandler>> {
    vec![
        Arc::new(LifecycleHandler),
        Arc::new(VersioningHandler),
        Arc::new(ObjectLockHandler),
        Arc::new(AclHandler),
    ]
}

/// Record the outcome of a put-style call as the subresource condition
fn record(
    subresource: Subresource,
    bucket: &str,
    backend: &str,
    backends: &BucketBackends,
    result: Result<()>,
) -> Result<()> {
    match result {
        Ok(()) => {
            backends.set_subresource_condition(bucket, backend, subresource, Some(Condition::available()));
            Ok(())
        }
        Err(e) => {
            let message = format!("failed to apply {}: {}", subresource, e);
            backends.set_subresource_condition(
                bucket,
                backend,
                subresource,
                Some(Condition::unavailable(message.clone())),
            );
            Err(Error::storage(message))
        }
    }
}

/// Puts or removes the lifecycle configuration
pub struct LifecycleHandler;

#[async_trait]
impl SubresourceHandler for LifecycleHandler {
    fn subresource(&self) -> Subresource {
        Subresource::Lifecycle
    }

    fn applies(&self, bucket: &Bucket, observed: Option<&BackendInfo>) -> bool {
        bucket.spec.for_provider.lifecycle_configuration.is_some()
            || bucket.spec.lifecycle_configuration_disabled
            || observed.is_some_and(|info| info.lifecycle_configuration_condition.is_some())
    }

    async fn handle(
        &self,
        bucket: &Bucket,
        backend: &str,
        client: &dyn StorageClient,
        backends: &BucketBackends,
    ) -> Result<()> {
        let name = bucket.name_any();
        let wanted = bucket
            .spec
            .for_provider
            .lifecycle_configuration
            .as_ref()
            .filter(|_| !bucket.spec.lifecycle_configuration_disabled);

        match wanted {
            Some(config) => {
                let result = client.put_bucket_lifecycle_configuration(&name, config).await;
                record(self.subresource(), &name, backend, backends, result)
            }
            None => {
                debug!(bucket = %name, backend, "Removing lifecycle configuration");
                match client.delete_bucket_lifecycle_configuration(&name).await {
                    Ok(()) => {
                        backends.set_subresource_condition(&name, backend, self.subresource(), None);
                        Ok(())
                    }
                    Err(e) => record(self.subresource(), &name, backend, backends, Err(e)),
                }
            }
        }
    }
}

/// Puts the versioning configuration
pub struct VersioningHandler;

#[async_trait]
impl SubresourceHandler for VersioningHandler {
    fn subresource(&self) -> Subresource {
        Subresource::Versioning
    }

    fn applies(&self, bucket: &Bucket, _observed: Option<&BackendInfo>) -> bool {
        bucket.spec.for_provider.versioning_configuration.is_some()
    }

    async fn handle(
        &self,
        bucket: &Bucket,
        backend: &str,
        client: &dyn StorageClient,
        backends: &BucketBackends,
    ) -> Result<()> {
        let name = bucket.name_any();
        let Some(config) = &bucket.spec.for_provider.versioning_configuration else {
            return Ok(());
        };
        let result = client.put_bucket_versioning(&name, config).await;
        record(self.subresource(), &name, backend, backends, result)
    }
}

/// Puts the default object lock retention
pub struct ObjectLockHandler;

#[async_trait]
impl SubresourceHandler for ObjectLockHandler {
    fn subresource(&self) -> Subresource {
        Subresource::ObjectLock
    }

    fn applies(&self, bucket: &Bucket, _observed: Option<&BackendInfo>) -> bool {
        bucket.spec.for_provider.object_lock_configuration.is_some()
    }

    async fn handle(
        &self,
        bucket: &Bucket,
        backend: &str,
        client: &dyn StorageClient,
        backends: &BucketBackends,
    ) -> Result<()> {
        let name = bucket.name_any();
        let Some(config) = &bucket.spec.for_provider.object_lock_configuration else {
            return Ok(());
        };
        let result = client.put_object_lock_configuration(&name, config).await;
        record(self.subresource(), &name, backend, backends, result)
    }
}

/// Puts the canned ACL
pub struct AclHandler;

#[async_trait]
impl SubresourceHandler for AclHandler {
    fn subresource(&self) -> Subresource {
        Subresource::Acl
    }

    fn applies(&self, bucket: &Bucket, _observed: Option<&BackendInfo>) -> bool {
        bucket.spec.for_provider.acl.is_some()
    }

    async fn handle(
        &self,
        bucket: &Bucket,
        backend: &str,
        client: &dyn StorageClient,
        backends: &BucketBackends,
    ) -> Result<()> {
        let name = bucket.name_any();
        let Some(acl) = &bucket.spec.for_provider.acl else {
            return Ok(());
        };
        let result = client.put_bucket_acl(&name, acl).await;
        record(self.subresource(), &name, backend, backends, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryStorage, StorageOp};
    use crate::crd::{BucketLifecycleConfiguration, BucketParameters, BucketSpec, VersioningConfiguration};

    fn bucket(params: BucketParameters, lifecycle_disabled: bool) -> Bucket {
        Bucket::new(
            "bucket",
            BucketSpec {
                for_provider: params,
                lifecycle_configuration_disabled: lifecycle_disabled,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn lifecycle_is_put_and_marked_available() {
        let storage = InMemoryStorage::new();
        storage.insert_bucket("bucket");
        let backends = BucketBackends::new();
        let b = bucket(
            BucketParameters {
                lifecycle_configuration: Some(BucketLifecycleConfiguration::default()),
                ..Default::default()
            },
            false,
        );

        LifecycleHandler.handle(&b, "b1", &storage, &backends).await.unwrap();

        assert!(storage.bucket("bucket").unwrap().lifecycle.is_some());
        let info = backends.backend_info("bucket", "b1").unwrap();
        assert!(info.lifecycle_configuration_condition.unwrap().is_available());
    }

    #[tokio::test]
    async fn disabled_lifecycle_is_removed_and_condition_cleared() {
        let storage = InMemoryStorage::new();
        storage.insert_bucket("bucket");
        let backends = BucketBackends::new();
        backends.set_subresource_condition("bucket", "b1", Subresource::Lifecycle, Some(Condition::available()));
        let b = bucket(
            BucketParameters {
                lifecycle_configuration: Some(BucketLifecycleConfiguration::default()),
                ..Default::default()
            },
            true,
        );

        let observed = backends.backend_info("bucket", "b1");
        assert!(LifecycleHandler.applies(&b, observed.as_ref()));
        LifecycleHandler.handle(&b, "b1", &storage, &backends).await.unwrap();

        let info = backends.backend_info("bucket", "b1").unwrap();
        assert!(info.lifecycle_configuration_condition.is_none());
    }

    #[tokio::test]
    async fn failed_put_records_unavailable_and_errors() {
        let storage = InMemoryStorage::new();
        storage.insert_bucket("bucket");
        storage.fail_on(StorageOp::PutVersioning, "access denied");
        let backends = BucketBackends::new();
        let b = bucket(
            BucketParameters {
                versioning_configuration: Some(VersioningConfiguration::default()),
                ..Default::default()
            },
            false,
        );

        let err = VersioningHandler.handle(&b, "b1", &storage, &backends).await.unwrap_err();
        assert!(err.to_string().contains("versioning configuration"));
        let info = backends.backend_info("bucket", "b1").unwrap();
        assert!(!info.versioning_configuration_condition.unwrap().is_available());
    }

    #[test]
    fn handlers_skip_unset_configuration() {
        let b = bucket(BucketParameters::default(), false);
        for handler in default_handlers() {
            assert!(!handler.applies(&b, None), "{} should not apply", handler.subresource());
        }
    }
}
