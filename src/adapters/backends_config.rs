//! Backend definitions adapter
//!
//! Loads the backend definitions file and registers each backend in a
//! [`BackendStore`].

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

use super::memory::InMemoryStorage;
use super::registry::{BackendStore, ClientHandle, HealthStatus};

/// Contents of the backend definitions file
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendsConfig {
    #[serde(default)]
    pub backends: Vec<BackendDefinition>,
}

/// A single backend definition
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendDefinition {
    /// Backend name, used in labels and status
    pub name: String,

    /// Backend type (memory)
    #[serde(rename = "type", default = "default_backend_type")]
    pub backend_type: String,

    /// Whether new buckets may be placed on this backend
    #[serde(default = "default_true")]
    pub active: bool,

    /// Initial health
    #[serde(default)]
    pub health: HealthStatus,
}

fn default_backend_type() -> String {
    "memory".to_string()
}

fn default_true() -> bool {
    true
}

/// Read and validate a backend definitions file
pub fn load_backends_config(path: &Path) -> Result<BackendsConfig> {
    let raw = std::fs::read_to_string(path)?;
    let config: BackendsConfig = serde_yaml::from_str(&raw)?;

    let mut names: Vec<&str> = config.backends.iter().map(|b| b.name.as_str()).collect();
    names.sort_unstable();
    if let Some(window) = names.windows(2).find(|w| w[0] == w[1]) {
        return Err(Error::config(format!("Duplicate backend name '{}'", window[0])));
    }
    if names.iter().any(|n| n.is_empty()) {
        return Err(Error::config("Backend name must not be empty"));
    }

    Ok(config)
}

/// Build a registry from backend definitions
pub fn build_backend_store(config: &BackendsConfig) -> Result<BackendStore> {
    let store = BackendStore::new();
    for backend in &config.backends {
        let client: ClientHandle = match backend.backend_type.as_str() {
            "memory" => Arc::new(InMemoryStorage::new()),
            other => {
                return Err(Error::config(format!(
                    "Unsupported backend type '{}' for backend '{}'",
                    other, backend.name
                )));
            }
        };
        store.add_backend(backend.name.clone(), client, backend.active, backend.health);
        info!(backend = %backend.name, active = backend.active, "Registered backend");
    }
    Ok(store)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::adapters::BackendRegistry;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_backends_with_defaults() {
        let file = write_config(
            "backends:\n  - name: ceph-a\n  - name: ceph-b\n    active: false\n    health: unhealthy\n",
        );
        let config = load_backends_config(file.path()).unwrap();
        assert_eq!(config.backends.len(), 2);
        assert!(config.backends[0].active);
        assert_eq!(config.backends[1].health, HealthStatus::Unhealthy);

        let store = build_backend_store(&config).unwrap();
        assert_eq!(store.all_backend_names(false), vec!["ceph-a"]);
        assert_eq!(store.health_status("ceph-b"), HealthStatus::Unhealthy);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let file = write_config("backends:\n  - name: a\n  - name: a\n");
        let err = load_backends_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("Duplicate backend name"));
    }

    #[test]
    fn unsupported_type_is_rejected() {
        let file = write_config("backends:\n  - name: a\n    type: azure\n");
        let config = load_backends_config(file.path()).unwrap();
        assert!(build_backend_store(&config).is_err());
    }
}
