//! OSO S3 Bucket Kubernetes Operator
//!
//! This operator keeps `Bucket` resources in agreement with a set of
//! S3-compatible storage backends, tolerating partial backend failures and
//! reporting quorum-based status.

pub mod adapters;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod reconcilers;

pub use error::{Error, Result};
