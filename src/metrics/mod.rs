//! Prometheus metrics for the S3 Bucket Operator
//!
//! Counters and histograms for reconciliations and per-backend operations,
//! served over HTTP together with the health endpoints.

mod prometheus;

pub use prometheus::*;
