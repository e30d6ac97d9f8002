//! Reconciliation engine for Bucket resources
//!
//! This module contains the logic that keeps a Bucket in agreement with
//! every storage backend it targets:
//! - Resolving target backends from the spec and labels
//! - Dispatching concurrent per-backend create/update/delete tasks
//! - Folding per-backend outcomes into quorum status
//! - Deciding when a converged bucket can be paused
//! - Persisting record changes under optimistic concurrency

pub mod accumulator;
pub mod auto_pause;
pub mod bucket;
pub mod cache;
pub mod dispatch;
pub mod persistence;
pub mod subresources;
pub mod targets;

pub use accumulator::{compute_quorum, BucketBackends, QuorumStatus};
pub use bucket::{BucketReconciler, Observation};
pub use cache::BucketCache;
pub use persistence::{apply_mutations, with_retry, MutateFn, Mutation};
pub use subresources::{default_handlers, Subresource, SubresourceHandler};
