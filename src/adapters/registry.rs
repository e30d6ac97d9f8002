//! Backend registry
//!
//! Process-wide view of the storage backends: their clients, whether they
//! are active, and their last known health. Health and activity are written
//! by whatever monitors the backends; the reconciler only reads them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crd::Bucket;
use crate::error::{Error, Result};

use super::storage::StorageClient;

/// Shared handle to a backend client
pub type ClientHandle = Arc<dyn StorageClient>;

/// Health reported for a backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

/// Read access to the registered backends
pub trait BackendRegistry: Send + Sync {
    /// Whether any backend has been registered at all
    fn is_any_backend_stored(&self) -> bool;

    /// Sorted backend names, optionally including inactive ones
    fn all_backend_names(&self, include_inactive: bool) -> Vec<String>;

    /// Clients of the active backends among `names`
    fn active_backends(&self, names: &[String]) -> HashMap<String, ClientHandle>;

    /// Health of a backend; unknown names report [`HealthStatus::Unknown`]
    fn health_status(&self, name: &str) -> HealthStatus;
}

/// Acquires a storage client for a bucket on a given backend
#[async_trait]
pub trait ClientProvider: Send + Sync {
    async fn get_client(&self, bucket: &Bucket, backend: &str) -> Result<ClientHandle>;
}

struct Backend {
    client: ClientHandle,
    active: bool,
    health: HealthStatus,
}

/// In-process backend registry
#[derive(Default)]
pub struct BackendStore {
    backends: RwLock<HashMap<String, Backend>>,
}

impl BackendStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a backend
    pub fn add_backend(
        &self,
        name: impl Into<String>,
        client: ClientHandle,
        active: bool,
        health: HealthStatus,
    ) {
        let name = name.into();
        debug!(backend = %name, active, ?health, "Registering backend");
        self.backends.write().insert(
            name,
            Backend {
                client,
                active,
                health,
            },
        );
    }

    pub fn remove_backend(&self, name: &str) {
        self.backends.write().remove(name);
    }

    pub fn set_active(&self, name: &str, active: bool) {
        if let Some(backend) = self.backends.write().get_mut(name) {
            backend.active = active;
        }
    }

    pub fn set_health(&self, name: &str, health: HealthStatus) {
        if let Some(backend) = self.backends.write().get_mut(name) {
            backend.health = health;
        }
    }

    /// Client for a backend regardless of its activity
    pub fn client(&self, name: &str) -> Option<ClientHandle> {
        self.backends.read().get(name).map(|b| b.client.clone())
    }
}

impl BackendRegistry for BackendStore {
    fn is_any_backend_stored(&self) -> bool {
        !self.backends.read().is_empty()
    }

    fn all_backend_names(&self, include_inactive: bool) -> Vec<String> {
        let mut names: Vec<String> = self
            .backends
            .read()
            .iter()
            .filter(|(_, b)| include_inactive || b.active)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn active_backends(&self, names: &[String]) -> HashMap<String, ClientHandle> {
        let backends = self.backends.read();
        names
            .iter()
            .filter_map(|name| {
                backends
                    .get(name)
                    .filter(|b| b.active)
                    .map(|b| (name.clone(), b.client.clone()))
            })
            .collect()
    }

    fn health_status(&self, name: &str) -> HealthStatus {
        self.backends
            .read()
            .get(name)
            .map(|b| b.health)
            .unwrap_or_default()
    }
}

#[async_trait]
impl ClientProvider for BackendStore {
    async fn get_client(&self, _bucket: &Bucket, backend: &str) -> Result<ClientHandle> {
        self.client(backend)
            .ok_or_else(|| Error::BackendNotFound(backend.to_string()))
    }
}
