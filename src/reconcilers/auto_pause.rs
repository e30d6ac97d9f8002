//! Auto-pause decision
//!
//! A bucket is paused only when every target backend reports it, and every
//! requested subresource, as Available. Anything short of that keeps the
//! bucket under reconciliation.

use kube::ResourceExt;
use tracing::debug;

use crate::adapters::{BackendRegistry, HealthStatus};
use crate::crd::{Bucket, PAUSE_LABEL, READY, SYNCED};

use super::accumulator::BucketBackends;
use super::subresources::Subresource;

/// Whether `bucket` has fully converged and may stop being reconciled
pub fn should_pause(
    bucket: &Bucket,
    targets: &[String],
    registry: &dyn BackendRegistry,
    backends: &BucketBackends,
    auto_pause_enabled: bool,
) -> bool {
    let name = bucket.name_any();

    if !(bucket.spec.auto_pause || auto_pause_enabled) {
        return false;
    }

    // An operator-set non-empty value overrides auto-pause.
    if bucket
        .labels()
        .get(PAUSE_LABEL)
        .is_some_and(|value| !value.is_empty())
    {
        return false;
    }

    let Some(status) = &bucket.status else {
        return false;
    };
    let ready = status.condition(READY).is_some_and(|c| c.is_available());
    let synced = status
        .condition(SYNCED)
        .is_some_and(|c| c.is_reconcile_success());
    if !ready || !synced {
        return false;
    }

    if targets.is_empty() || backends.count_available(&name, targets) != targets.len() {
        return false;
    }

    if let Some(unhealthy) = targets
        .iter()
        .find(|t| registry.health_status(t) == HealthStatus::Unhealthy)
    {
        debug!(bucket = %name, backend = %unhealthy, "Not pausing, backend is unhealthy");
        return false;
    }

    let spec = &bucket.spec;
    if spec.lifecycle_configuration_disabled {
        if !backends.subresource_removed_from_all(&name, targets, Subresource::Lifecycle) {
            return false;
        }
    } else if spec.for_provider.lifecycle_configuration.is_some()
        && !backends.subresource_available_on_all(&name, targets, Subresource::Lifecycle)
    {
        return false;
    }

    if spec.for_provider.versioning_configuration.is_some()
        && !backends.subresource_available_on_all(&name, targets, Subresource::Versioning)
    {
        return false;
    }

    if spec.for_provider.object_lock_configuration.is_some()
        && !backends.subresource_available_on_all(&name, targets, Subresource::ObjectLock)
    {
        return false;
    }

    true
}
