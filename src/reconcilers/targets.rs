//! Backend target resolution
//!
//! Works out which backends an operation on a bucket should act on, from
//! `spec.providers` (or every known backend) and the per-backend labels.

use std::collections::HashSet;

use kube::ResourceExt;

use crate::crd::{backend_label, Bucket, BACKEND_LABEL_PREFIX};
use crate::error::{Error, Result};

/// Backends the bucket should be placed on, in a stable order
///
/// Starts from `spec.providers` when set, otherwise from `all_known`, and drops
/// every backend whose label is present with a value other than "true".
pub fn resolve_targets(bucket: &Bucket, all_known: &[String]) -> Vec<String> {
    let candidates: &[String] = if bucket.spec.providers.is_empty() {
        all_known
    } else {
        &bucket.spec.providers
    };

    let labels = bucket.labels();
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .filter(|name| match labels.get(&backend_label(name)) {
            Some(value) => value == "true",
            None => true,
        })
        .cloned()
        .collect()
}

/// Backends explicitly opted out through a label value other than "true"
pub fn opted_out_backends(bucket: &Bucket) -> Vec<String> {
    let mut names: Vec<String> = bucket
        .labels()
        .iter()
        .filter(|(_, value)| value.as_str() != "true")
        .filter_map(|(key, _)| key.strip_prefix(BACKEND_LABEL_PREFIX))
        .map(str::to_string)
        .collect();
    names.sort();
    names
}

/// Replace opt-in labels with one per target, leaving opt-out labels alone
pub fn set_target_labels(bucket: &mut Bucket, targets: &[String]) {
    let labels = bucket.labels_mut();
    labels.retain(|key, value| !(key.starts_with(BACKEND_LABEL_PREFIX) && value == "true"));
    for target in targets {
        labels
            .entry(backend_label(target))
            .or_insert_with(|| "true".to_string());
    }
}

/// Reject a bucket whose explicit providers are all unknown to the registry
pub fn check_providers_known(bucket: &Bucket, all_known: &[String]) -> Result<()> {
    if bucket.spec.providers.is_empty() {
        return Ok(());
    }
    if bucket
        .spec
        .providers
        .iter()
        .any(|p| all_known.iter().any(|k| k == p))
    {
        return Ok(());
    }
    Err(Error::config(format!(
        "None of the requested backends {:?} are registered",
        bucket.spec.providers
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::BucketSpec;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn bucket(providers: &[&str], labels: &[(&str, &str)]) -> Bucket {
        let mut bucket = Bucket::new(
            "bucket",
            BucketSpec {
                providers: names(providers),
                ..Default::default()
            },
        );
        for (k, v) in labels {
            bucket.labels_mut().insert(k.to_string(), v.to_string());
        }
        bucket
    }

    #[test]
    fn empty_providers_means_all_known() {
        let b = bucket(&[], &[]);
        assert_eq!(resolve_targets(&b, &names(&["a", "b"])), names(&["a", "b"]));
    }

    #[test]
    fn providers_take_precedence_over_known() {
        let b = bucket(&["b", "c"], &[]);
        assert_eq!(resolve_targets(&b, &names(&["a", "b"])), names(&["b", "c"]));
    }

    #[test]
    fn opt_out_label_excludes_backend() {
        let b = bucket(
            &[],
            &[
                ("storage.oso.sh/backend.a", "false"),
                ("storage.oso.sh/backend.b", "true"),
            ],
        );
        assert_eq!(resolve_targets(&b, &names(&["a", "b", "c"])), names(&["b", "c"]));
        assert_eq!(opted_out_backends(&b), names(&["a"]));
    }

    #[test]
    fn duplicate_providers_are_collapsed() {
        let b = bucket(&["a", "a", "b"], &[]);
        assert_eq!(resolve_targets(&b, &[]), names(&["a", "b"]));
    }

    #[test]
    fn set_target_labels_keeps_opt_outs() {
        let mut b = bucket(
            &[],
            &[
                ("storage.oso.sh/backend.old", "true"),
                ("storage.oso.sh/backend.x", "false"),
                ("team", "storage"),
            ],
        );
        set_target_labels(&mut b, &names(&["a", "b"]));

        let labels = b.labels();
        assert!(!labels.contains_key("storage.oso.sh/backend.old"));
        assert_eq!(labels.get("storage.oso.sh/backend.x").unwrap(), "false");
        assert_eq!(labels.get("storage.oso.sh/backend.a").unwrap(), "true");
        assert_eq!(labels.get("storage.oso.sh/backend.b").unwrap(), "true");
        assert_eq!(labels.get("team").unwrap(), "storage");
    }

    #[test]
    fn unknown_providers_are_a_config_error() {
        let b = bucket(&["ghost"], &[]);
        assert!(check_providers_known(&b, &names(&["a"])).is_err());
        assert!(check_providers_known(&bucket(&["a", "ghost"], &[]), &names(&["a"])).is_ok());
        assert!(check_providers_known(&bucket(&[], &[]), &[]).is_ok());
    }
}
