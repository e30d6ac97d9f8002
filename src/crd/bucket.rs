//! Bucket Custom Resource Definition

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Condition;

/// Prefix of the per-backend opt-in/opt-out labels
pub const BACKEND_LABEL_PREFIX: &str = "storage.oso.sh/backend.";

/// Label that stops reconciliation of a bucket while set to "true"
pub const PAUSE_LABEL: &str = "storage.oso.sh/paused";

/// Finalizer held while the bucket still exists on any backend
pub const IN_USE_FINALIZER: &str = "storage.oso.sh/in-use";

/// Bucket resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "storage.oso.sh",
    version = "v1alpha1",
    kind = "Bucket",
    plural = "buckets",
    singular = "bucket",
    shortname = "s3b",
    status = "BucketStatus",
    printcolumn = r#"{"name": "Ready", "type": "string", "jsonPath": ".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name": "Synced", "type": "string", "jsonPath": ".status.conditions[?(@.type=='Synced')].status"}"#,
    printcolumn = r#"{"name": "Paused", "type": "string", "jsonPath": ".metadata.labels.storage\\.oso\\.sh/paused"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketSpec {
    /// Backends the bucket should exist on (empty = all known backends)
    #[serde(default)]
    pub providers: Vec<String>,

    /// Remove the bucket from every backend while keeping this resource
    #[serde(default)]
    pub disabled: bool,

    /// Stop reconciling once the bucket has converged on every backend
    #[serde(default)]
    pub auto_pause: bool,

    /// Remove any lifecycle configuration from the backends
    #[serde(default)]
    pub lifecycle_configuration_disabled: bool,

    /// Parameters passed through to the storage backends
    #[serde(default)]
    pub for_provider: BucketParameters,
}

/// Bucket parameters applied on each backend
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketParameters {
    /// Canned ACL (private, public-read, public-read-write, authenticated-read)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acl: Option<String>,

    /// Region/placement constraint used at creation time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_constraint: Option<String>,

    /// Enable object lock when the bucket is created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_lock_enabled_for_bucket: Option<bool>,

    /// Lifecycle rules
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifecycle_configuration: Option<BucketLifecycleConfiguration>,

    /// Versioning state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versioning_configuration: Option<VersioningConfiguration>,

    /// Default object lock retention
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_lock_configuration: Option<ObjectLockConfiguration>,
}

/// Lifecycle configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketLifecycleConfiguration {
    pub rules: Vec<LifecycleRule>,
}

/// Single lifecycle rule
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Enabled or Disabled
    #[serde(default = "default_rule_status")]
    pub status: String,

    #[serde(default)]
    pub prefix: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_days: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub noncurrent_version_expiration_days: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_incomplete_multipart_upload_days: Option<i32>,
}

fn default_rule_status() -> String {
    "Enabled".to_string()
}

/// Versioning configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersioningConfiguration {
    /// Enabled or Suspended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Enabled or Disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mfa_delete: Option<String>,
}

/// Object lock configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectLockConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_lock_enabled: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<ObjectLockRule>,
}

/// Object lock rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectLockRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_retention: Option<DefaultRetention>,
}

/// Default retention applied to new objects
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DefaultRetention {
    /// GOVERNANCE or COMPLIANCE
    pub mode: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub days: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub years: Option<i32>,
}

/// Bucket status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketStatus {
    /// Ready and Synced conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Per-backend observed state, keyed by backend name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub backends: BTreeMap<String, BackendInfo>,

    /// Observed generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Observed state of the bucket on one backend
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendInfo {
    pub bucket_condition: Condition,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifecycle_configuration_condition: Option<Condition>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub versioning_configuration_condition: Option<Condition>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_lock_configuration_condition: Option<Condition>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub acl_condition: Option<Condition>,
}

impl BackendInfo {
    pub fn new(bucket_condition: Condition) -> Self {
        Self {
            bucket_condition,
            lifecycle_configuration_condition: None,
            versioning_configuration_condition: None,
            object_lock_configuration_condition: None,
            acl_condition: None,
        }
    }
}

impl BucketStatus {
    /// Find a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Set a condition, keeping the transition time when nothing changed
    pub fn set_condition(&mut self, condition: Condition) {
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) if existing.equivalent(&condition) => {}
            Some(existing) => *existing = condition,
            None => self.conditions.push(condition),
        }
    }

    /// Replace the backend map, keeping transition times of unchanged conditions
    pub fn set_backends(&mut self, backends: BTreeMap<String, BackendInfo>) {
        let mut merged = BTreeMap::new();
        for (name, mut info) in backends {
            if let Some(previous) = self.backends.get(&name) {
                info.keep_unchanged_times(previous);
            }
            merged.insert(name, info);
        }
        self.backends = merged;
    }
}

impl BackendInfo {
    fn keep_unchanged_times(&mut self, previous: &BackendInfo) {
        fn keep(new: &mut Option<Condition>, old: &Option<Condition>) {
            if let (Some(new), Some(old)) = (new.as_mut(), old.as_ref()) {
                if new.equivalent(old) {
                    new.last_transition_time = old.last_transition_time;
                }
            }
        }

        if self.bucket_condition.equivalent(&previous.bucket_condition) {
            self.bucket_condition.last_transition_time =
                previous.bucket_condition.last_transition_time;
        }
        keep(
            &mut self.lifecycle_configuration_condition,
            &previous.lifecycle_configuration_condition,
        );
        keep(
            &mut self.versioning_configuration_condition,
            &previous.versioning_configuration_condition,
        );
        keep(
            &mut self.object_lock_configuration_condition,
            &previous.object_lock_configuration_condition,
        );
        keep(&mut self.acl_condition, &previous.acl_condition);
    }
}

/// Label key recording whether a bucket targets a backend
pub fn backend_label(backend: &str) -> String {
    format!("{}{}", BACKEND_LABEL_PREFIX, backend)
}

impl Bucket {
    /// Whether the pause label is set to "true"
    pub fn is_paused(&self) -> bool {
        self.labels().get(PAUSE_LABEL).map(String::as_str) == Some("true")
    }

    /// Whether the resource has been marked for deletion
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the in-use finalizer is present
    pub fn has_in_use_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == IN_USE_FINALIZER)
    }

    /// Current status, or an empty one
    pub fn status_or_default(&self) -> BucketStatus {
        self.status.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{READY, REASON_AVAILABLE};

    #[test]
    fn set_condition_keeps_transition_time_when_unchanged() {
        let mut status = BucketStatus::default();
        let first = Condition::available();
        let first_time = first.last_transition_time;
        status.set_condition(first);

        std::thread::sleep(std::time::Duration::from_millis(5));
        status.set_condition(Condition::available());

        let ready = status.condition(READY).unwrap();
        assert_eq!(ready.last_transition_time, first_time);
        assert_eq!(ready.reason.as_deref(), Some(REASON_AVAILABLE));
    }

    #[test]
    fn set_condition_replaces_on_status_change() {
        let mut status = BucketStatus::default();
        status.set_condition(Condition::available());
        status.set_condition(Condition::unavailable("backend down"));

        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.condition(READY).unwrap().status, "False");
    }

    #[test]
    fn bucket_spec_defaults_from_minimal_yaml() {
        let spec: BucketSpec = serde_yaml::from_str("providers: [ceph-a]").unwrap();
        assert_eq!(spec.providers, vec!["ceph-a".to_string()]);
        assert!(!spec.auto_pause);
        assert!(spec.for_provider.lifecycle_configuration.is_none());
    }
}
