//! Per-backend task dispatch
//!
//! One task per target backend, bounded by a single per-call deadline.
//! Create races the tasks and keeps the first success; Update and Delete
//! wait for every task. Tasks live in a [`JoinSet`], so returning early on
//! the deadline aborts whatever is still in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use kube::ResourceExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::adapters::{ClientHandle, HealthStatus};
use crate::crd::{Bucket, Condition};
use crate::error::{Error, Result};
use crate::metrics;

use super::accumulator::BucketBackends;
use super::subresources::SubresourceHandler;

/// Backend name paired with the client to reach it
pub type BackendClients = Vec<(String, ClientHandle)>;

/// Result of racing bucket creation across backends
#[derive(Debug)]
pub enum CreateOutcome {
    /// The named backend won the race
    Created(String),
    /// Every backend failed; carries the last error seen
    Failed(Error),
    /// The deadline elapsed before any backend succeeded
    TimedOut,
}

fn record_outcome(operation: &str, backend: &str, result: &Result<()>) {
    let outcome = if result.is_ok() { "success" } else { "failure" };
    metrics::BACKEND_OPERATIONS
        .with_label_values(&[operation, backend, outcome])
        .inc();
}

/// Create the bucket on every backend, keeping the first to succeed
///
/// Only the task that wins the compare-and-swap reports on the ready channel;
/// every other task reports on the error channel, which is sized to the task
/// count so no sender can block once the dispatcher has returned. Tasks still
/// running at the deadline are aborted.
pub async fn create_on_backends(
    bucket: Arc<Bucket>,
    clients: BackendClients,
    deadline: Instant,
) -> CreateOutcome {
    let total = clients.len();
    if total == 0 {
        return CreateOutcome::Failed(Error::config("No backends to create the bucket on"));
    }

    let claimed = Arc::new(AtomicBool::new(false));
    let (ready_tx, mut ready_rx) = mpsc::channel::<String>(1);
    let (err_tx, mut err_rx) = mpsc::channel::<Result<()>>(total);
    let mut tasks = JoinSet::new();

    for (backend, client) in clients {
        let bucket = bucket.clone();
        let claimed = claimed.clone();
        let ready_tx = ready_tx.clone();
        let err_tx = err_tx.clone();
        tasks.spawn(async move {
            let name = bucket.name_any();
            let result = match client.create_bucket(&name, &bucket.spec.for_provider).await {
                Ok(()) | Err(Error::BucketAlreadyOwned(_)) => Ok(()),
                Err(e) => Err(e.for_backend(&backend)),
            };
            record_outcome("create", &backend, &result);

            match result {
                Ok(())
                    if claimed
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok() =>
                {
                    debug!(bucket = %name, backend = %backend, "Bucket created, claiming winner");
                    let _ = ready_tx.send(backend).await;
                }
                other => {
                    let _ = err_tx.send(other).await;
                }
            }
        });
    }
    drop(ready_tx);
    drop(err_tx);

    let deadline_reached = tokio::time::sleep_until(deadline);
    tokio::pin!(deadline_reached);

    let mut drained = 0;
    let mut last_error = None;
    let mut ready_open = true;
    let mut errors_open = true;

    loop {
        tokio::select! {
            biased;

            winner = ready_rx.recv(), if ready_open => match winner {
                Some(backend) => {
                    // Late creations finish in the background.
                    tasks.detach_all();
                    return CreateOutcome::Created(backend);
                }
                None => ready_open = false,
            },
            reported = err_rx.recv(), if errors_open => match reported {
                Some(Ok(())) => drained += 1,
                Some(Err(e)) => {
                    drained += 1;
                    last_error = Some(e);
                }
                None => errors_open = false,
            },
            () = &mut deadline_reached => return CreateOutcome::TimedOut,
        }

        if drained == total || (!ready_open && !errors_open) {
            return CreateOutcome::Failed(
                last_error.unwrap_or_else(|| Error::storage("bucket creation did not complete")),
            );
        }
    }
}

/// Everything an Update task needs for one backend
pub struct UpdateTask {
    pub bucket: Arc<Bucket>,
    pub backend: String,
    pub client: ClientHandle,
    pub backends: Arc<BucketBackends>,
    pub handlers: Arc<Vec<Arc<dyn SubresourceHandler>>>,
    pub health: HealthStatus,
    pub recreate_missing: bool,
}

impl UpdateTask {
    pub async fn run(self) -> Result<()> {
        let name = self.bucket.name_any();
        let backend = self.backend.as_str();

        let exists = match self.client.bucket_exists(&name).await {
            Ok(exists) => exists,
            Err(e) => {
                self.backends
                    .set_bucket_condition(&name, backend, Condition::unavailable(e.to_string()));
                return Err(e);
            }
        };

        if !exists {
            if !self.recreate_missing {
                info!(bucket = %name, backend, "Bucket missing on backend, dropping it from status");
                self.backends.delete_backend(&name, backend);
                return Ok(());
            }
            info!(bucket = %name, backend, "Bucket missing on backend, recreating");
            match self
                .client
                .create_bucket(&name, &self.bucket.spec.for_provider)
                .await
            {
                Ok(()) | Err(Error::BucketAlreadyOwned(_)) => {}
                Err(e) => {
                    self.backends
                        .set_bucket_condition(&name, backend, Condition::unavailable(e.to_string()));
                    return Err(e);
                }
            }
        }

        self.backends
            .set_bucket_condition(&name, backend, Condition::available());

        let observed = self.backends.backend_info(&name, backend);
        let mut errors = Vec::new();
        for handler in self.handlers.iter() {
            if !handler.applies(&self.bucket, observed.as_ref()) {
                continue;
            }
            if let Err(e) = handler
                .handle(&self.bucket, backend, self.client.as_ref(), &self.backends)
                .await
            {
                warn!(bucket = %name, backend, subresource = %handler.subresource(), error = %e, "Subresource update failed");
                errors.push(e);
            }
        }

        if self.health == HealthStatus::Unhealthy {
            self.backends.set_bucket_condition(
                &name,
                backend,
                Condition::unavailable("backend is unhealthy"),
            );
        }

        match Error::join(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Remove the bucket from one backend
///
/// The backend is marked Deleting up front and dropped from the
/// accumulator once the bucket is confirmed gone.
pub async fn delete_on_backend(
    bucket: Arc<Bucket>,
    backend: String,
    client: ClientHandle,
    backends: Arc<BucketBackends>,
) -> Result<()> {
    let name = bucket.name_any();
    backends.set_bucket_condition(&name, &backend, Condition::deleting());

    if !client.bucket_exists(&name).await? {
        debug!(bucket = %name, backend = %backend, "Bucket already gone from backend");
        backends.delete_backend(&name, &backend);
        return Ok(());
    }

    match client.delete_bucket(&name).await {
        Ok(()) | Err(Error::BucketNotFound(_)) => {
            backends.delete_backend(&name, &backend);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Spawns per-backend tasks and waits for all of them
pub struct TaskSet {
    operation: &'static str,
    tasks: JoinSet<(String, Result<()>)>,
    backends: Vec<String>,
}

impl TaskSet {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            tasks: JoinSet::new(),
            backends: Vec::new(),
        }
    }

    pub fn spawn<F>(&mut self, backend: String, task: F)
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.backends.push(backend.clone());
        self.tasks.spawn(async move { (backend, task.await) });
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Wait for every task until `deadline`, returning the errors
    ///
    /// Tasks still running at the deadline are aborted and reported as
    /// timed out.
    pub async fn join_all(mut self, deadline: Instant) -> Vec<Error> {
        let operation = self.operation;
        let mut errors = Vec::new();
        let mut finished = Vec::new();

        let drained = timeout_at(deadline, async {
            while let Some(joined) = self.tasks.join_next().await {
                match joined {
                    Ok((backend, result)) => {
                        record_outcome(operation, &backend, &result);
                        if let Err(e) = result {
                            errors.push(e.for_backend(&backend));
                        }
                        finished.push(backend);
                    }
                    Err(e) => errors.push(Error::storage(format!("{} task failed: {}", operation, e))),
                }
            }
        })
        .await;

        if drained.is_err() {
            for backend in self.backends.iter().filter(|b| !finished.contains(b)) {
                warn!(operation, backend = %backend, "Backend task did not finish before the deadline");
                errors.push(Error::Timeout(operation.to_string()).for_backend(backend));
            }
            self.tasks.abort_all();
        }
        errors
    }
}

/// Check bucket existence on each backend concurrently
///
/// Backends that error or do not answer before the deadline are absent from
/// the result.
pub async fn exists_on_backends(
    bucket: &str,
    clients: &BackendClients,
    deadline: Instant,
) -> HashMap<String, bool> {
    let checks = clients.iter().map(|(backend, client)| async move {
        match client.bucket_exists(bucket).await {
            Ok(exists) => Some((backend.clone(), exists)),
            Err(e) => {
                warn!(bucket, backend = %backend, error = %e, "Failed to check bucket existence");
                None
            }
        }
    });

    match timeout_at(deadline, join_all(checks)).await {
        Ok(results) => results.into_iter().flatten().collect(),
        Err(_) => {
            warn!(bucket, "Timed out checking bucket existence");
            HashMap::new()
        }
    }
}
