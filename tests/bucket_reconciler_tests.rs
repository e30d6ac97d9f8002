//! Integration tests for the multi-backend bucket reconciler
//!
//! These tests drive Observe/Create/Update/Delete end to end against the
//! in-memory record store and in-memory storage backends, injecting backend
//! failures to check the resulting status, labels and finalizers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use s3_bucket_operator::adapters::{
    BackendStore, HealthStatus, InMemoryStorage, MemoryRecordStore, StorageOp,
};
use s3_bucket_operator::config::{OperatorConfig, RetryConfig};
use s3_bucket_operator::crd::{
    backend_label, BackendInfo, Bucket, BucketParameters, BucketSpec, BucketStatus, Condition,
    VersioningConfiguration, IN_USE_FINALIZER, PAUSE_LABEL, READY, SYNCED,
};
use s3_bucket_operator::reconcilers::{BucketCache, BucketReconciler};
use s3_bucket_operator::Error;

const BUCKET: &str = "bucket";

// ============================================================================
// Test Helpers
// ============================================================================

struct Harness {
    records: Arc<MemoryRecordStore>,
    registry: Arc<BackendStore>,
    storage: HashMap<String, Arc<InMemoryStorage>>,
    engine: BucketReconciler,
}

impl Harness {
    fn new(backends: &[&str]) -> Self {
        Self::with_config(backends, test_config())
    }

    fn with_config(backends: &[&str], config: OperatorConfig) -> Self {
        let records = Arc::new(MemoryRecordStore::new());
        let registry = Arc::new(BackendStore::new());
        let mut storage = HashMap::new();
        for name in backends {
            let backend = Arc::new(InMemoryStorage::new());
            registry.add_backend(*name, backend.clone(), true, HealthStatus::Healthy);
            storage.insert(name.to_string(), backend);
        }

        let engine = BucketReconciler::new(
            registry.clone(),
            registry.clone(),
            records.clone(),
            Arc::new(BucketCache::new(Duration::from_secs(60))),
            Arc::new(config),
        );

        Self {
            records,
            registry,
            storage,
            engine,
        }
    }

    fn storage(&self, backend: &str) -> &InMemoryStorage {
        &self.storage[backend]
    }

    /// Put the bucket on the given backends directly
    fn seed_storage(&self, backends: &[&str]) {
        for backend in backends {
            self.storage(backend).insert_bucket(BUCKET);
        }
    }

    fn insert(&self, bucket: Bucket) -> Bucket {
        self.records.insert(bucket)
    }

    fn current(&self) -> Bucket {
        self.records.record(BUCKET).expect("bucket record exists")
    }

    fn status(&self) -> BucketStatus {
        self.current().status.expect("status was written")
    }
}

fn test_config() -> OperatorConfig {
    OperatorConfig {
        operation_timeout: Duration::from_secs(2),
        retry: RetryConfig {
            max_attempts: 5,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        },
        ..Default::default()
    }
}

fn bucket(spec: BucketSpec) -> Bucket {
    Bucket::new(BUCKET, spec)
}

fn with_finalizer(mut bucket: Bucket) -> Bucket {
    bucket.finalizers_mut().push(IN_USE_FINALIZER.to_string());
    bucket
}

fn with_backends(mut bucket: Bucket, backends: &[(&str, Condition)]) -> Bucket {
    let status = bucket.status.get_or_insert_with(BucketStatus::default);
    for (name, condition) in backends {
        status
            .backends
            .insert(name.to_string(), BackendInfo::new(condition.clone()));
    }
    bucket
}

fn backend_names(status: &BucketStatus) -> Vec<&str> {
    status.backends.keys().map(String::as_str).collect()
}

// ============================================================================
// Create Tests
// ============================================================================

#[tokio::test]
async fn create_keeps_first_successful_backend_only() {
    let h = Harness::new(&["b1", "b2"]);
    h.storage("b2")
        .fail_on(StorageOp::CreateBucket, "connection refused");
    let b = h.insert(bucket(BucketSpec::default()));

    h.engine.create(&b).await.unwrap();

    let status = h.status();
    assert_eq!(backend_names(&status), vec!["b1"]);
    assert!(status.backends["b1"].bucket_condition.is_available());
    assert!(status.condition(READY).unwrap().is_available());

    let labels = h.current().labels().clone();
    assert_eq!(labels.get(&backend_label("b1")).unwrap(), "true");
    assert_eq!(labels.get(&backend_label("b2")).unwrap(), "true");
}

#[tokio::test]
async fn create_lists_a_single_winner_when_every_backend_succeeds() {
    let h = Harness::new(&["b1", "b2", "b3"]);
    let b = h.insert(bucket(BucketSpec::default()));

    h.engine.create(&b).await.unwrap();

    let status = h.status();
    assert_eq!(status.backends.len(), 1);
    assert!(status.condition(READY).unwrap().is_available());
}

#[tokio::test]
async fn create_fails_when_every_backend_fails() {
    let h = Harness::new(&["b1", "b2"]);
    h.storage("b1").fail_on(StorageOp::CreateBucket, "access denied");
    h.storage("b2").fail_on(StorageOp::CreateBucket, "access denied");
    let b = h.insert(bucket(BucketSpec::default()));

    let err = h.engine.create(&b).await.unwrap_err();
    assert!(err.to_string().contains("access denied"));

    let status = h.status();
    assert!(!status.condition(READY).unwrap().is_available());
    assert!(status.backends.is_empty());
}

#[tokio::test]
async fn create_without_eligible_backends_pauses_the_bucket() {
    let h = Harness::new(&["b1"]);
    h.registry.set_active("b1", false);
    let b = h.insert(bucket(BucketSpec::default()));

    h.engine.create(&b).await.unwrap();

    let current = h.current();
    assert!(current.is_paused());
    assert_eq!(current.labels().get(&backend_label("b1")).unwrap(), "true");
    assert!(!h.storage("b1").has_bucket(BUCKET));

    // The pause holds until the generation moves on.
    let status = current.status.clone().unwrap();
    assert_eq!(status.observed_generation, current.metadata.generation);
    assert!(!status.condition(READY).unwrap().is_available());
}

#[tokio::test]
async fn create_with_only_unknown_providers_is_a_config_error() {
    let h = Harness::new(&["b1"]);
    let b = h.insert(bucket(BucketSpec {
        providers: vec!["ghost".to_string()],
        ..Default::default()
    }));

    let err = h.engine.create(&b).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn create_without_registered_backends_is_a_config_error() {
    let h = Harness::new(&[]);
    let b = h.insert(bucket(BucketSpec::default()));
    assert!(matches!(h.engine.create(&b).await, Err(Error::Config(_))));
}

#[tokio::test]
async fn create_skips_opted_out_backends() {
    let h = Harness::new(&["b1", "b2"]);
    let mut b = bucket(BucketSpec::default());
    b.labels_mut()
        .insert(backend_label("b1"), "false".to_string());
    let b = h.insert(b);

    h.engine.create(&b).await.unwrap();

    assert!(!h.storage("b1").has_bucket(BUCKET));
    assert!(h.storage("b2").has_bucket(BUCKET));
    let labels = h.current().labels().clone();
    assert_eq!(labels.get(&backend_label("b1")).unwrap(), "false");
}

#[tokio::test]
async fn create_of_disabled_bucket_is_a_no_op() {
    let h = Harness::new(&["b1"]);
    let b = h.insert(bucket(BucketSpec {
        disabled: true,
        ..Default::default()
    }));

    h.engine.create(&b).await.unwrap();
    assert!(!h.storage("b1").has_bucket(BUCKET));
    assert_eq!(h.records.object_writes() + h.records.status_writes(), 0);
}

#[tokio::test]
async fn create_of_vanished_record_still_succeeds() {
    let h = Harness::new(&["b1"]);
    let b = bucket(BucketSpec::default());

    h.engine.create(&b).await.unwrap();
    assert!(h.storage("b1").has_bucket(BUCKET));
    assert!(h.records.record(BUCKET).is_none());
}

// ============================================================================
// Update Tests
// ============================================================================

#[tokio::test]
async fn update_converges_on_every_backend() {
    let h = Harness::new(&["b1", "b2", "b3"]);
    h.seed_storage(&["b1", "b2", "b3"]);
    let b = h.insert(bucket(BucketSpec::default()));

    h.engine.update(&b).await.unwrap();

    let status = h.status();
    assert!(status.condition(READY).unwrap().is_available());
    assert!(status.condition(SYNCED).unwrap().is_reconcile_success());
    assert_eq!(backend_names(&status), vec!["b1", "b2", "b3"]);
    assert!(status
        .backends
        .values()
        .all(|info| info.bucket_condition.is_available()));
    assert_eq!(status.observed_generation, b.metadata.generation);
}

#[tokio::test]
async fn update_with_quorum_but_not_full_coverage_lists_missing_backends() {
    let h = Harness::new(&["b1", "b2", "b3"]);
    h.seed_storage(&["b1", "b2", "b3"]);
    h.storage("b3").fail_on(StorageOp::HeadBucket, "timeout");
    h.storage("b2").fail_on(StorageOp::HeadBucket, "timeout");
    let b = h.insert(bucket(BucketSpec::default()));

    assert!(h.engine.update(&b).await.is_err());

    let status = h.status();
    assert!(status.condition(READY).unwrap().is_available());
    let synced = status.condition(SYNCED).unwrap();
    assert!(!synced.is_reconcile_success());
    assert_eq!(
        synced.message.as_deref(),
        Some("bucket is not available on backends: [b2, b3]")
    );
    assert!(!status.backends["b2"].bucket_condition.is_available());
}

#[tokio::test]
async fn update_below_min_replicas_is_not_ready() {
    let h = Harness::with_config(
        &["b1", "b2"],
        OperatorConfig {
            min_replicas: 2,
            ..test_config()
        },
    );
    h.seed_storage(&["b1", "b2"]);
    h.storage("b2").fail_on(StorageOp::HeadBucket, "unreachable");
    let b = h.insert(bucket(BucketSpec::default()));

    assert!(h.engine.update(&b).await.is_err());
    assert!(!h.status().condition(READY).unwrap().is_available());
}

#[tokio::test]
async fn update_recreates_missing_bucket() {
    let h = Harness::new(&["b1", "b2"]);
    h.seed_storage(&["b1"]);
    let b = h.insert(bucket(BucketSpec::default()));

    h.engine.update(&b).await.unwrap();

    assert!(h.storage("b2").has_bucket(BUCKET));
    assert!(h.status().condition(SYNCED).unwrap().is_reconcile_success());
}

#[tokio::test]
async fn update_without_recreate_drops_missing_backend() {
    let h = Harness::with_config(
        &["b1", "b2"],
        OperatorConfig {
            recreate_missing_bucket: false,
            ..test_config()
        },
    );
    h.seed_storage(&["b1"]);
    let b = h.insert(with_backends(
        bucket(BucketSpec::default()),
        &[("b1", Condition::available()), ("b2", Condition::available())],
    ));

    h.engine.update(&b).await.unwrap();

    assert!(!h.storage("b2").has_bucket(BUCKET));
    let status = h.status();
    assert_eq!(backend_names(&status), vec!["b1"]);
    assert!(!status.condition(SYNCED).unwrap().is_reconcile_success());
}

#[tokio::test]
async fn update_applies_subresources_on_every_backend() {
    let h = Harness::new(&["b1", "b2"]);
    h.seed_storage(&["b1", "b2"]);
    let b = h.insert(bucket(BucketSpec {
        for_provider: BucketParameters {
            acl: Some("private".to_string()),
            versioning_configuration: Some(VersioningConfiguration {
                status: Some("Enabled".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
        ..Default::default()
    }));

    h.engine.update(&b).await.unwrap();

    for backend in ["b1", "b2"] {
        let stored = h.storage(backend).bucket(BUCKET).unwrap();
        assert_eq!(stored.acl.as_deref(), Some("private"));
        assert!(stored.versioning.is_some());
    }
    let status = h.status();
    let info = &status.backends["b1"];
    assert!(info.acl_condition.as_ref().unwrap().is_available());
    assert!(info
        .versioning_configuration_condition
        .as_ref()
        .unwrap()
        .is_available());
}

#[tokio::test]
async fn failed_subresource_fails_update_and_sync() {
    let h = Harness::new(&["b1"]);
    h.seed_storage(&["b1"]);
    h.storage("b1").fail_on(StorageOp::PutAcl, "access denied");
    let b = h.insert(bucket(BucketSpec {
        for_provider: BucketParameters {
            acl: Some("public-read".to_string()),
            ..Default::default()
        },
        ..Default::default()
    }));

    let err = h.engine.update(&b).await.unwrap_err();
    assert!(err.to_string().contains("acl"));

    let status = h.status();
    assert!(status.condition(READY).unwrap().is_available());
    assert!(!status.condition(SYNCED).unwrap().is_reconcile_success());
    assert!(!status.backends["b1"]
        .acl_condition
        .as_ref()
        .unwrap()
        .is_available());
}

#[tokio::test]
async fn update_removes_bucket_from_opted_out_backend() {
    let h = Harness::new(&["b1", "b2"]);
    h.seed_storage(&["b1", "b2"]);
    let mut b = with_backends(
        bucket(BucketSpec::default()),
        &[("b1", Condition::available()), ("b2", Condition::available())],
    );
    b.labels_mut()
        .insert(backend_label("b2"), "false".to_string());
    let b = h.insert(b);

    h.engine.update(&b).await.unwrap();

    assert!(!h.storage("b2").has_bucket(BUCKET));
    assert_eq!(backend_names(&h.status()), vec!["b1"]);
}

#[tokio::test]
async fn failed_opt_out_removal_keeps_backend_deleting() {
    let h = Harness::new(&["b1", "b2"]);
    h.seed_storage(&["b1", "b2"]);
    h.storage("b2").fail_on(StorageOp::DeleteBucket, "503 slow down");
    let mut b = with_backends(
        bucket(BucketSpec::default()),
        &[("b1", Condition::available()), ("b2", Condition::available())],
    );
    b.labels_mut()
        .insert(backend_label("b2"), "false".to_string());
    let b = h.insert(b);

    assert!(h.engine.update(&b).await.is_err());

    let status = h.status();
    assert!(status.backends["b2"]
        .bucket_condition
        .equivalent(&Condition::deleting()));
}

#[tokio::test]
async fn update_of_disabled_bucket_removes_it_everywhere() {
    let h = Harness::new(&["b1", "b2"]);
    h.seed_storage(&["b1", "b2"]);
    let b = h.insert(with_finalizer(with_backends(
        bucket(BucketSpec {
            disabled: true,
            ..Default::default()
        }),
        &[("b1", Condition::available()), ("b2", Condition::available())],
    )));

    h.engine.update(&b).await.unwrap();

    assert!(!h.storage("b1").has_bucket(BUCKET));
    assert!(!h.storage("b2").has_bucket(BUCKET));
    let current = h.current();
    assert!(current.has_in_use_finalizer());
    let status = current.status.unwrap();
    assert!(status.backends.is_empty());
    assert!(!status.condition(READY).unwrap().is_available());
}

#[tokio::test]
async fn update_retries_record_conflicts() {
    let h = Harness::new(&["b1"]);
    h.seed_storage(&["b1"]);
    let b = h.insert(bucket(BucketSpec::default()));
    h.records.inject_conflicts(3);

    h.engine.update(&b).await.unwrap();
    assert!(h.status().condition(SYNCED).unwrap().is_reconcile_success());
}

#[tokio::test]
async fn unchanged_update_writes_nothing() {
    let h = Harness::new(&["b1"]);
    h.seed_storage(&["b1"]);
    let b = h.insert(bucket(BucketSpec::default()));

    h.engine.update(&b).await.unwrap();
    let writes = h.records.object_writes() + h.records.status_writes();

    h.engine.update(&h.current()).await.unwrap();
    assert_eq!(h.records.object_writes() + h.records.status_writes(), writes);
}

// ============================================================================
// Auto-Pause Tests
// ============================================================================

fn auto_pause_bucket() -> Bucket {
    bucket(BucketSpec {
        providers: vec!["a".to_string(), "b".to_string()],
        auto_pause: true,
        ..Default::default()
    })
}

#[tokio::test]
async fn converged_bucket_is_paused_after_one_update() {
    let h = Harness::new(&["a", "b"]);
    h.seed_storage(&["a", "b"]);
    let b = h.insert(auto_pause_bucket());

    h.engine.update(&b).await.unwrap();

    let current = h.current();
    assert!(current.is_paused());
    assert_eq!(current.labels().get(PAUSE_LABEL).unwrap(), "true");
}

#[tokio::test]
async fn partially_converged_bucket_is_not_paused() {
    let h = Harness::new(&["a", "b"]);
    h.seed_storage(&["a", "b"]);
    h.storage("b").fail_on(StorageOp::HeadBucket, "unreachable");
    let b = h.insert(auto_pause_bucket());

    assert!(h.engine.update(&b).await.is_err());
    assert!(!h.current().is_paused());
}

#[tokio::test]
async fn unhealthy_backend_blocks_pause() {
    let h = Harness::new(&["a", "b"]);
    h.seed_storage(&["a", "b"]);
    h.registry.set_health("b", HealthStatus::Unhealthy);
    let b = h.insert(auto_pause_bucket());

    h.engine.update(&b).await.unwrap();

    let current = h.current();
    assert!(!current.is_paused());
    let status = current.status.unwrap();
    assert!(!status.backends["b"].bucket_condition.is_available());
}

#[tokio::test]
async fn operator_wide_auto_pause_applies_without_spec_flag() {
    let h = Harness::with_config(
        &["a"],
        OperatorConfig {
            auto_pause: true,
            ..test_config()
        },
    );
    h.seed_storage(&["a"]);
    let b = h.insert(bucket(BucketSpec::default()));

    h.engine.update(&b).await.unwrap();
    assert!(h.current().is_paused());
}

// ============================================================================
// Delete Tests
// ============================================================================

#[tokio::test]
async fn delete_keeps_failing_backend_and_finalizer() {
    let h = Harness::new(&["b1", "b2"]);
    h.seed_storage(&["b2"]);
    h.storage("b2").fail_on(StorageOp::HeadBucket, "connection reset");
    let b = h.insert(with_finalizer(with_backends(
        bucket(BucketSpec::default()),
        &[("b1", Condition::available()), ("b2", Condition::available())],
    )));

    let err = h.engine.delete(&b).await.unwrap_err();
    assert!(err.to_string().contains("b2"));

    let current = h.current();
    assert!(current.has_in_use_finalizer());
    let status = current.status.unwrap();
    assert_eq!(backend_names(&status), vec!["b2"]);
    assert!(status.backends["b2"]
        .bucket_condition
        .equivalent(&Condition::deleting()));
}

#[tokio::test]
async fn delete_removes_bucket_and_finalizer() {
    let h = Harness::new(&["b1", "b2"]);
    h.seed_storage(&["b1", "b2"]);
    let b = h.insert(with_finalizer(with_backends(
        bucket(BucketSpec::default()),
        &[("b1", Condition::available()), ("b2", Condition::available())],
    )));

    h.engine.delete(&b).await.unwrap();

    assert!(!h.storage("b1").has_bucket(BUCKET));
    assert!(!h.storage("b2").has_bucket(BUCKET));
    let current = h.current();
    assert!(!current.has_in_use_finalizer());
    assert!(current.status.unwrap().backends.is_empty());
}

#[tokio::test]
async fn repeated_delete_is_a_no_op() {
    let h = Harness::new(&["b1"]);
    let b = h.insert(with_finalizer(bucket(BucketSpec::default())));

    h.engine.delete(&b).await.unwrap();
    assert!(!h.current().has_in_use_finalizer());
    let writes = h.records.object_writes() + h.records.status_writes();

    h.engine.delete(&h.current()).await.unwrap();
    assert_eq!(h.records.object_writes() + h.records.status_writes(), writes);
}

#[tokio::test]
async fn released_record_disappears_from_store() {
    let h = Harness::new(&["b1"]);
    h.seed_storage(&["b1"]);
    let mut b = with_finalizer(with_backends(
        bucket(BucketSpec::default()),
        &[("b1", Condition::available())],
    ));
    b.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
    let b = h.insert(b);

    h.engine.delete(&b).await.unwrap();
    assert!(h.records.record(BUCKET).is_none());

    // A second pass against the stale copy finds nothing to write.
    h.engine.delete(&b).await.unwrap();
}

#[tokio::test]
async fn delete_keeps_unreachable_listed_backend() {
    let h = Harness::new(&["b1", "b2"]);
    h.seed_storage(&["b1", "b2"]);
    h.registry.set_active("b2", false);
    let b = h.insert(with_finalizer(with_backends(
        bucket(BucketSpec::default()),
        &[("b1", Condition::available()), ("b2", Condition::available())],
    )));

    assert!(h.engine.delete(&b).await.is_err());
    let current = h.current();
    assert!(current.has_in_use_finalizer());
    assert_eq!(backend_names(&current.status.unwrap()), vec!["b2"]);
}

#[tokio::test]
async fn inactive_backend_holding_the_bucket_blocks_finalizer_removal() {
    let h = Harness::new(&["b1", "b2"]);
    h.seed_storage(&["b1", "b2"]);
    let b = h.insert(with_finalizer(bucket(BucketSpec::default())));
    h.engine.update(&b).await.unwrap();
    assert_eq!(backend_names(&h.status()), vec!["b1", "b2"]);

    h.registry.set_active("b1", false);
    h.engine.update(&h.current()).await.unwrap();
    let status = h.status();
    assert_eq!(backend_names(&status), vec!["b1", "b2"]);
    assert!(!status.backends["b1"].bucket_condition.is_available());

    let err = h.engine.delete(&h.current()).await.unwrap_err();
    assert!(err.to_string().contains("b1"));

    let current = h.current();
    assert!(current.has_in_use_finalizer());
    assert_eq!(backend_names(&current.status.unwrap()), vec!["b1"]);
    assert!(h.storage("b1").has_bucket(BUCKET));
    assert!(!h.storage("b2").has_bucket(BUCKET));
}

#[tokio::test]
async fn update_with_every_backend_inactive_keeps_status() {
    let h = Harness::new(&["b1", "b2"]);
    h.seed_storage(&["b1", "b2"]);
    let b = h.insert(bucket(BucketSpec::default()));
    h.engine.update(&b).await.unwrap();

    h.registry.set_active("b1", false);
    h.registry.set_active("b2", false);
    h.engine.update(&h.current()).await.unwrap();

    let status = h.status();
    assert_eq!(backend_names(&status), vec!["b1", "b2"]);
    assert!(!status.condition(READY).unwrap().is_available());
}

// ============================================================================
// Observe Tests
// ============================================================================

#[tokio::test]
async fn observe_tracks_bucket_lifecycle() {
    let h = Harness::new(&["b1", "b2"]);
    let b = h.insert(bucket(BucketSpec::default()));

    let observed = h.engine.observe(&b).await.unwrap();
    assert!(!observed.exists);

    h.engine.create(&b).await.unwrap();
    let observed = h.engine.observe(&h.current()).await.unwrap();
    assert!(observed.exists);
    assert!(!observed.up_to_date);

    h.engine.update(&h.current()).await.unwrap();
    let observed = h.engine.observe(&h.current()).await.unwrap();
    assert!(observed.exists);
    assert!(observed.up_to_date);
}

#[tokio::test]
async fn observe_uses_converged_cache() {
    let h = Harness::new(&["b1"]);
    h.seed_storage(&["b1"]);
    let b = h.insert(bucket(BucketSpec::default()));
    h.engine.update(&b).await.unwrap();

    // Backend checks would now fail, but the cached generation answers.
    h.storage("b1").fail_on(StorageOp::HeadBucket, "unreachable");
    let observed = h.engine.observe(&h.current()).await.unwrap();
    assert!(observed.up_to_date);

    h.engine.cache().evict(BUCKET);
    let observed = h.engine.observe(&h.current()).await.unwrap();
    assert!(!observed.exists);
}

#[tokio::test]
async fn observe_ignores_cache_after_opt_out_label() {
    let h = Harness::new(&["b1", "b2"]);
    h.seed_storage(&["b1", "b2"]);
    let b = h.insert(bucket(BucketSpec::default()));
    h.engine.update(&b).await.unwrap();
    assert!(h.engine.observe(&h.current()).await.unwrap().up_to_date);

    let mut opted_out = h.current();
    opted_out
        .labels_mut()
        .insert(backend_label("b2"), "false".to_string());
    let observed = h.engine.observe(&opted_out).await.unwrap();
    assert!(observed.exists);
    assert!(!observed.up_to_date);
}

#[tokio::test]
async fn observe_reports_disabled_bucket_with_backends_as_stale() {
    let h = Harness::new(&["b1"]);
    let b = h.insert(with_backends(
        bucket(BucketSpec {
            disabled: true,
            ..Default::default()
        }),
        &[("b1", Condition::available())],
    ));

    let observed = h.engine.observe(&b).await.unwrap();
    assert!(observed.exists);
    assert!(!observed.up_to_date);
}

// ============================================================================
// Controller Flow Tests
// ============================================================================

#[tokio::test]
async fn finalizer_is_added_once() {
    let h = Harness::new(&["b1"]);
    let b = h.insert(bucket(BucketSpec::default()));

    let updated = h.engine.ensure_finalizer(&b).await.unwrap().unwrap();
    assert!(updated.has_in_use_finalizer());
    h.engine.ensure_finalizer(&updated).await.unwrap();
    assert_eq!(
        h.current()
            .finalizers()
            .iter()
            .filter(|f| *f == IN_USE_FINALIZER)
            .count(),
        1
    );
}

#[tokio::test]
async fn resume_removes_pause_label() {
    let h = Harness::new(&["b1"]);
    let mut b = bucket(BucketSpec::default());
    b.labels_mut()
        .insert(PAUSE_LABEL.to_string(), "true".to_string());
    let b = h.insert(b);

    let resumed = h.engine.resume(&b).await.unwrap().unwrap();
    assert!(!resumed.is_paused());
    assert!(!resumed.labels().contains_key(PAUSE_LABEL));
}
