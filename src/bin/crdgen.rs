//! CRD YAML Generator
//!
//! This binary generates the Kubernetes CRD manifest for the Bucket
//! resource defined by the s3-bucket-operator.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/bucket.yaml

use s3_bucket_operator::crd::generate_crds;

fn main() {
    for crd in generate_crds() {
        println!("---");
        print!("{}", crd);
    }
}
