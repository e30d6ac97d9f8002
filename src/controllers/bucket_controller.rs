//! Bucket controller
//!
//! Watches Bucket resources and triggers reconciliation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Controller},
        watcher::Config as WatcherConfig,
    },
    Api, Client, ResourceExt,
};
use tracing::{debug, error, info, instrument};

use crate::controllers::Context;
use crate::crd::Bucket;
use crate::error::{Error, Result};
use crate::metrics;

/// Run the Bucket controller
pub async fn run(client: Client, context: Arc<Context>) {
    let api: Api<Bucket> = Api::all(client.clone());

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("Bucket CRD not installed: {}", e);
        return;
    }

    info!("Starting Bucket controller");

    Controller::new(api, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!(name = %obj.name, "Reconciled Bucket");
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation error");
                }
            }
        })
        .await;
}

/// What a reconcile pass should do with a bucket
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    /// Paused and unchanged since it was last reconciled
    Skip,
    /// Paused, but the desired state moved on
    Resume,
    /// Marked for deletion with cleanup still pending
    Delete,
    /// Marked for deletion with nothing left to clean up
    Released,
    Reconcile,
}

/// Finalizers are handled here rather than with `kube::runtime::finalizer`
/// so that a paused bucket is left alone even while it is being deleted.
fn plan(bucket: &Bucket) -> Step {
    if bucket.is_paused() {
        let observed = bucket.status.as_ref().and_then(|s| s.observed_generation);
        if observed.is_some() && observed == bucket.metadata.generation {
            return Step::Skip;
        }
        return Step::Resume;
    }
    if bucket.is_being_deleted() {
        if bucket.has_in_use_finalizer() {
            return Step::Delete;
        }
        return Step::Released;
    }
    Step::Reconcile
}

/// Main reconciliation function
#[instrument(skip(ctx), fields(name = %obj.name_any()))]
async fn reconcile(obj: Arc<Bucket>, ctx: Arc<Context>) -> Result<Action> {
    let engine = &ctx.engine;
    let poll = Action::requeue(ctx.config.poll_interval);

    let bucket = match plan(&obj) {
        Step::Skip => {
            debug!("Bucket is paused, skipping");
            return Ok(Action::await_change());
        }
        Step::Released => return Ok(Action::await_change()),
        Step::Resume => {
            info!("Desired state changed, resuming paused bucket");
            match engine.resume(&obj).await? {
                Some(bucket) if bucket.is_being_deleted() => {
                    timed("delete", engine.delete(&bucket)).await?;
                    return Ok(Action::await_change());
                }
                Some(bucket) => bucket,
                None => return Ok(Action::await_change()),
            }
        }
        Step::Delete => {
            timed("delete", engine.delete(&obj)).await?;
            return Ok(Action::await_change());
        }
        Step::Reconcile => (*obj).clone(),
    };

    let Some(bucket) = engine.ensure_finalizer(&bucket).await? else {
        return Ok(Action::await_change());
    };

    let observation = timed("observe", engine.observe(&bucket)).await?;
    if !observation.exists {
        timed("create", engine.create(&bucket)).await?;
    } else if !observation.up_to_date {
        timed("update", engine.update(&bucket)).await?;
    } else {
        debug!("Bucket is up to date");
    }

    Ok(poll)
}

/// Run one engine operation under its duration timer and counters
async fn timed<T, F>(operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&[operation])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&[operation]).inc();

    let result = fut.await;
    if result.is_err() {
        metrics::RECONCILIATION_ERRORS
            .with_label_values(&[operation])
            .inc();
    }
    result
}

fn requeue_after(error: &Error) -> Duration {
    match error {
        Error::Kube(_) | Error::Conflict(_) => Duration::from_secs(30),
        Error::Config(_) => Duration::from_secs(300),
        Error::Timeout(_) => Duration::from_secs(15),
        Error::Storage(_) | Error::Backend { .. } | Error::Backends(_) => Duration::from_secs(60),
        _ => Duration::from_secs(30),
    }
}

/// Error policy for the controller
fn error_policy(obj: Arc<Bucket>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    error!(
        name = %name,
        error = %error,
        "Reconciliation failed, scheduling retry"
    );

    Action::requeue(requeue_after(error))
}
