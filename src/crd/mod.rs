//! Custom Resource Definitions for the S3 Bucket Operator

mod bucket;
mod condition;

pub use bucket::*;
pub use condition::*;

use kube::CustomResourceExt;

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Vec<String> {
    vec![serde_yaml::to_string(&Bucket::crd()).unwrap()]
}
