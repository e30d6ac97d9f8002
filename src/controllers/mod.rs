//! Kubernetes controller for Bucket resources
//!
//! Watches Bucket changes and drives them through the reconciliation engine.

mod bucket_controller;

pub use bucket_controller::run as run_bucket_controller;

use std::sync::Arc;

use crate::config::OperatorConfig;
use crate::reconcilers::BucketReconciler;

/// Shared context for the controller
pub struct Context {
    /// Multi-backend reconciliation engine
    pub engine: Arc<BucketReconciler>,

    pub config: Arc<OperatorConfig>,
}

impl Context {
    /// Create a new context
    pub fn new(engine: Arc<BucketReconciler>, config: Arc<OperatorConfig>) -> Self {
        Self { engine, config }
    }
}
