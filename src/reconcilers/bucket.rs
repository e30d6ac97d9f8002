//! Bucket reconciler
//!
//! Drives one Bucket towards its desired state across every target backend.
//! Each operation resolves its targets, fans out per-backend tasks, folds the
//! results into status and persists the outcome with conflict retries.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::ResourceExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapters::{BackendRegistry, ClientProvider, RecordStore};
use crate::config::OperatorConfig;
use crate::crd::{
    BackendInfo, Bucket, BucketStatus, Condition, IN_USE_FINALIZER, PAUSE_LABEL, READY, SYNCED,
};
use crate::error::{Error, Result};
use crate::metrics;

use super::accumulator::{compute_quorum, BucketBackends};
use super::auto_pause::should_pause;
use super::cache::BucketCache;
use super::dispatch::{
    create_on_backends, delete_on_backend, exists_on_backends, BackendClients, CreateOutcome,
    TaskSet, UpdateTask,
};
use super::persistence::{apply_mutations, MutateFn, Mutation};
use super::subresources::{default_handlers, SubresourceHandler};
use super::targets::{check_providers_known, opted_out_backends, resolve_targets, set_target_labels};

/// What Observe found for a bucket
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Observation {
    /// The bucket exists on at least one target backend
    pub exists: bool,
    /// Nothing is left to do for the current generation
    pub up_to_date: bool,
}

/// Multi-backend bucket reconciliation engine
pub struct BucketReconciler {
    registry: Arc<dyn BackendRegistry>,
    clients: Arc<dyn ClientProvider>,
    store: Arc<dyn RecordStore>,
    cache: Arc<BucketCache>,
    config: Arc<OperatorConfig>,
    handlers: Arc<Vec<Arc<dyn SubresourceHandler>>>,
}

impl BucketReconciler {
    pub fn new(
        registry: Arc<dyn BackendRegistry>,
        clients: Arc<dyn ClientProvider>,
        store: Arc<dyn RecordStore>,
        cache: Arc<BucketCache>,
        config: Arc<OperatorConfig>,
    ) -> Self {
        Self {
            registry,
            clients,
            store,
            cache,
            config,
            handlers: Arc::new(default_handlers()),
        }
    }

    /// Replace the subresource handler chain
    pub fn with_handlers(mut self, handlers: Vec<Arc<dyn SubresourceHandler>>) -> Self {
        self.handlers = Arc::new(handlers);
        self
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    pub fn cache(&self) -> &BucketCache {
        &self.cache
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.config.operation_timeout
    }

    fn ensure_backends_registered(&self) -> Result<()> {
        if self.registry.is_any_backend_stored() {
            Ok(())
        } else {
            Err(Error::config("No storage backends are registered"))
        }
    }

    /// Clients for the active backends among `names`, in the order given
    ///
    /// A backend whose client cannot be acquired is skipped for this call.
    async fn clients_for(&self, bucket: &Bucket, names: &[String]) -> BackendClients {
        let active = self.registry.active_backends(names);
        let mut clients = Vec::with_capacity(active.len());
        for name in names {
            if !active.contains_key(name) {
                debug!(bucket = %bucket.name_any(), backend = %name, "Backend is inactive, skipping");
                continue;
            }
            match self.clients.get_client(bucket, name).await {
                Ok(client) => clients.push((name.clone(), client)),
                Err(e) => {
                    warn!(bucket = %bucket.name_any(), backend = %name, error = %e, "Failed to acquire storage client, skipping backend");
                }
            }
        }
        clients
    }

    async fn persist(&self, name: &str, callbacks: Vec<MutateFn<'_>>) -> Result<Option<Bucket>> {
        apply_mutations(self.store.as_ref(), name, &self.config.retry, callbacks).await
    }

    /// Check whether the bucket exists and is fully reconciled
    pub async fn observe(&self, bucket: &Bucket) -> Result<Observation> {
        self.ensure_backends_registered()?;
        let name = bucket.name_any();
        let status = bucket.status_or_default();

        if bucket.spec.disabled {
            return Ok(Observation {
                exists: true,
                up_to_date: status.backends.is_empty(),
            });
        }

        let generation = bucket.metadata.generation.unwrap_or_default();
        let desired = resolve_targets(bucket, &self.registry.all_backend_names(false));
        if self.cache.is_converged(&name, generation, &desired) {
            debug!(bucket = %name, generation, "Bucket converged recently, skipping backend checks");
            return Ok(Observation {
                exists: true,
                up_to_date: true,
            });
        }

        let clients = self.clients_for(bucket, &desired).await;
        let found = exists_on_backends(&name, &clients, self.deadline()).await;

        let exists = found.values().any(|exists| *exists);
        let on_every_target = clients
            .iter()
            .all(|(backend, _)| found.get(backend).copied().unwrap_or(false));
        let targets: Vec<&String> = clients.iter().map(|(backend, _)| backend).collect();
        let status_matches = targets.iter().all(|t| {
            status
                .backends
                .get(t.as_str())
                .is_some_and(|info| info.bucket_condition.is_available())
        }) && status.backends.keys().all(|b| targets.contains(&b));
        let converged = status
            .condition(READY)
            .is_some_and(Condition::is_available)
            && status
                .condition(SYNCED)
                .is_some_and(Condition::is_reconcile_success);

        let up_to_date = exists
            && on_every_target
            && status_matches
            && converged
            && status.observed_generation == bucket.metadata.generation;

        debug!(bucket = %name, exists, up_to_date, "Observed bucket");
        Ok(Observation { exists, up_to_date })
    }

    /// Create the bucket on the first backend that accepts it
    pub async fn create(&self, bucket: &Bucket) -> Result<()> {
        let name = bucket.name_any();
        if bucket.spec.disabled {
            info!(bucket = %name, "Bucket is disabled, not creating");
            return Ok(());
        }
        self.ensure_backends_registered()?;

        let all_known = self.registry.all_backend_names(true);
        check_providers_known(bucket, &all_known)?;
        let desired = resolve_targets(bucket, &all_known);
        let clients = self.clients_for(bucket, &desired).await;

        if clients.is_empty() {
            warn!(bucket = %name, targets = ?desired, "No eligible backends, pausing bucket");
            let generation = bucket.metadata.generation;
            self.persist(
                &name,
                vec![
                    label_targets(&desired),
                    write_status(move |status| {
                        status.set_condition(Condition::unavailable("no eligible backends"));
                        status.observed_generation = generation;
                    }),
                    set_pause_label(),
                ],
            )
            .await?;
            return Ok(());
        }

        info!(bucket = %name, backends = clients.len(), "Creating bucket");
        let outcome = create_on_backends(Arc::new(bucket.clone()), clients, self.deadline()).await;

        match outcome {
            CreateOutcome::Created(winner) => {
                info!(bucket = %name, backend = %winner, "Bucket created");
                let backends = BTreeMap::from([(winner, BackendInfo::new(Condition::available()))]);
                self.persist(
                    &name,
                    vec![
                        label_targets(&desired),
                        write_status(move |status| {
                            status.set_backends(backends.clone());
                            status.set_condition(Condition::available());
                            status.set_condition(Condition::reconcile_success());
                        }),
                    ],
                )
                .await?;
                Ok(())
            }
            CreateOutcome::Failed(e) => {
                warn!(bucket = %name, error = %e, "Bucket creation failed on every backend");
                self.record_failure(&name, &e).await?;
                Err(e)
            }
            CreateOutcome::TimedOut => {
                let e = Error::Timeout(format!("creating bucket {}", name));
                warn!(bucket = %name, "Bucket creation timed out");
                self.record_failure(&name, &e).await?;
                Err(e)
            }
        }
    }

    async fn record_failure(&self, name: &str, error: &Error) -> Result<()> {
        let message = error.to_string();
        self.persist(
            name,
            vec![write_status(move |status| {
                status.set_condition(Condition::unavailable(message.clone()));
                status.set_condition(Condition::reconcile_error(message.clone()));
            })],
        )
        .await?;
        Ok(())
    }

    /// Bring every target backend in line with the bucket spec
    pub async fn update(&self, bucket: &Bucket) -> Result<()> {
        self.ensure_backends_registered()?;
        if bucket.spec.disabled {
            return self.disable(bucket).await;
        }

        let name = bucket.name_any();
        let generation = bucket.metadata.generation;
        let status = bucket.status_or_default();

        let all_known = self.registry.all_backend_names(true);
        check_providers_known(bucket, &all_known)?;
        let desired = resolve_targets(bucket, &all_known);
        let clients = self.clients_for(bucket, &desired).await;
        let targets: Vec<String> = clients.iter().map(|(backend, _)| backend.clone()).collect();

        let backends = Arc::new(BucketBackends::new());
        backends.seed(&name, &status.backends);
        let shared = Arc::new(bucket.clone());

        let mut tasks = TaskSet::new("update");
        for (backend, client) in clients {
            let task = UpdateTask {
                bucket: shared.clone(),
                backend: backend.clone(),
                client,
                backends: backends.clone(),
                handlers: self.handlers.clone(),
                health: self.registry.health_status(&backend),
                recreate_missing: self.config.recreate_missing_bucket,
            };
            tasks.spawn(backend, task.run());
        }

        let mut errors = Vec::new();
        let removals: Vec<String> = opted_out_backends(bucket)
            .into_iter()
            .filter(|b| status.backends.contains_key(b) && !targets.contains(b))
            .collect();
        if !removals.is_empty() {
            info!(bucket = %name, backends = ?removals, "Removing bucket from opted-out backends");
            let removal_clients = self.clients_for(bucket, &removals).await;
            for backend in &removals {
                match removal_clients.iter().find(|(b, _)| b == backend) {
                    Some((_, client)) => tasks.spawn(
                        backend.clone(),
                        delete_on_backend(shared.clone(), backend.clone(), client.clone(), backends.clone()),
                    ),
                    None => errors.push(Error::BackendNotFound(backend.clone()).for_backend(backend)),
                }
            }
        }

        debug!(bucket = %name, tasks = tasks.len(), "Dispatching update");
        errors.extend(tasks.join_all(self.deadline()).await);

        let quorum = {
            let snapshot = backends.snapshot(&name, &targets);
            compute_quorum(&snapshot, &targets, self.config.min_replicas)
        };
        // Unreachable desired backends keep their entry until the bucket is removed there
        let unreachable: Vec<String> = desired
            .iter()
            .filter(|b| status.backends.contains_key(b.as_str()) && !targets.contains(*b))
            .cloned()
            .collect();
        for backend in &unreachable {
            debug!(bucket = %name, backend = %backend, "Backend unreachable, keeping it listed");
            backends.set_bucket_condition(
                &name,
                backend,
                Condition::unavailable("backend is inactive or unreachable"),
            );
        }

        let mut listed = targets.clone();
        listed.extend(removals.iter().cloned());
        listed.extend(unreachable);
        let observed = backends.snapshot(&name, &listed);

        let error = Error::join(errors);
        let ready = quorum.ready.clone();
        let synced = match &error {
            Some(e) if quorum.synced.is_reconcile_success() => Condition::reconcile_error(e.to_string()),
            _ => quorum.synced.clone(),
        };

        let mut projected = bucket.clone();
        {
            let status = projected.status.get_or_insert_with(BucketStatus::default);
            status.set_backends(observed.clone());
            status.set_condition(ready.clone());
            status.set_condition(synced.clone());
        }
        let pause = error.is_none()
            && should_pause(
                &projected,
                &targets,
                self.registry.as_ref(),
                &backends,
                self.config.auto_pause,
            );

        let mut callbacks = vec![
            label_targets(&desired),
            write_status(move |status| {
                status.set_backends(observed.clone());
                status.set_condition(ready.clone());
                status.set_condition(synced.clone());
                status.observed_generation = generation;
            }),
        ];
        if pause {
            info!(bucket = %name, "Bucket fully converged, pausing reconciliation");
            metrics::AUTO_PAUSES.inc();
            callbacks.push(set_pause_label());
        }
        self.persist(&name, callbacks).await?;

        let converged = quorum.is_converged() && error.is_none();
        if converged {
            let active = resolve_targets(bucket, &self.registry.all_backend_names(false));
            self.cache
                .set_converged(&name, generation.unwrap_or_default(), &active);
        } else {
            self.cache.evict(&name);
        }

        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Remove a disabled bucket from every backend it is still on
    async fn disable(&self, bucket: &Bucket) -> Result<()> {
        let name = bucket.name_any();
        let listed: Vec<String> = bucket.status_or_default().backends.into_keys().collect();
        if !listed.is_empty() {
            info!(bucket = %name, backends = ?listed, "Bucket is disabled, removing it from backends");
        }

        let (observed, error) = self.delete_from(bucket, &listed).await;
        let synced = match &error {
            Some(e) => Condition::reconcile_error(e.to_string()),
            None => Condition::reconcile_success(),
        };
        self.persist(
            &name,
            vec![write_status(move |status| {
                status.set_backends(observed.clone());
                status.set_condition(Condition::unavailable("bucket is disabled"));
                status.set_condition(synced.clone());
            })],
        )
        .await?;
        self.cache.evict(&name);

        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Delete the bucket from every backend, then release the finalizer
    pub async fn delete(&self, bucket: &Bucket) -> Result<()> {
        self.ensure_backends_registered()?;
        let name = bucket.name_any();
        self.cache.evict(&name);

        let mut names = resolve_targets(bucket, &self.registry.all_backend_names(true));
        for listed in bucket.status_or_default().backends.into_keys() {
            if !names.contains(&listed) {
                names.push(listed);
            }
        }
        names.sort();

        info!(bucket = %name, backends = ?names, "Deleting bucket");
        let (observed, error) = self.delete_from(bucket, &names).await;

        let synced = match &error {
            Some(e) => Condition::reconcile_error(e.to_string()),
            None => Condition::reconcile_success(),
        };
        let mut callbacks = vec![write_status(move |status| {
            status.set_backends(observed.clone());
            status.set_condition(Condition::deleting());
            status.set_condition(synced.clone());
        })];

        match error {
            Some(e) => {
                self.persist(&name, callbacks).await?;
                Err(e)
            }
            None => {
                callbacks.push(remove_finalizer());
                if self.persist(&name, callbacks).await?.is_some() {
                    metrics::CLEANUPS.inc();
                }
                Ok(())
            }
        }
    }

    /// Delete from `names`, returning what is left and the joined errors
    ///
    /// Backends listed in status without a reachable client stay listed and
    /// count as failures, as do active backends whose client cannot be
    /// acquired. Inactive backends that are not listed never held the bucket.
    async fn delete_from(
        &self,
        bucket: &Bucket,
        names: &[String],
    ) -> (BTreeMap<String, BackendInfo>, Option<Error>) {
        let name = bucket.name_any();
        let status = bucket.status_or_default();
        let backends = Arc::new(BucketBackends::new());
        backends.seed(&name, &status.backends);

        let clients = self.clients_for(bucket, names).await;
        let active = self.registry.active_backends(names);
        let shared = Arc::new(bucket.clone());
        let mut errors = Vec::new();
        let mut tasks = TaskSet::new("delete");

        for backend in names {
            match clients.iter().find(|(b, _)| b == backend) {
                Some((_, client)) => tasks.spawn(
                    backend.clone(),
                    delete_on_backend(shared.clone(), backend.clone(), client.clone(), backends.clone()),
                ),
                None if status.backends.contains_key(backend) || active.contains_key(backend) => {
                    warn!(bucket = %name, backend = %backend, "Backend unreachable, bucket stays listed");
                    if status.backends.contains_key(backend) {
                        backends.set_bucket_condition(&name, backend, Condition::deleting());
                    }
                    errors.push(Error::BackendNotFound(backend.clone()).for_backend(backend));
                }
                None => {
                    debug!(bucket = %name, backend = %backend, "Backend is inactive and never held the bucket");
                }
            }
        }

        errors.extend(tasks.join_all(self.deadline()).await);
        (backends.snapshot(&name, names), Error::join(errors))
    }

    /// Add the in-use finalizer if it is missing
    pub async fn ensure_finalizer(&self, bucket: &Bucket) -> Result<Option<Bucket>> {
        if bucket.has_in_use_finalizer() {
            return Ok(Some(bucket.clone()));
        }
        let callback: MutateFn<'_> = Box::new(|bucket: &mut Bucket| {
            if bucket.has_in_use_finalizer() {
                return Mutation::Unchanged;
            }
            bucket.finalizers_mut().push(IN_USE_FINALIZER.to_string());
            Mutation::Object
        });
        self.persist(&bucket.name_any(), vec![callback]).await
    }

    /// Drop the pause label so the bucket is reconciled again
    pub async fn resume(&self, bucket: &Bucket) -> Result<Option<Bucket>> {
        let callback: MutateFn<'_> = Box::new(|bucket: &mut Bucket| {
            match bucket.labels_mut().remove(PAUSE_LABEL) {
                Some(_) => Mutation::Object,
                None => Mutation::Unchanged,
            }
        });
        self.persist(&bucket.name_any(), vec![callback]).await
    }
}

fn label_targets(targets: &[String]) -> MutateFn<'_> {
    Box::new(move |bucket: &mut Bucket| {
        let before = bucket.labels().clone();
        set_target_labels(bucket, targets);
        if *bucket.labels() == before {
            Mutation::Unchanged
        } else {
            Mutation::Object
        }
    })
}

fn set_pause_label() -> MutateFn<'static> {
    Box::new(|bucket: &mut Bucket| {
        let labels = bucket.labels_mut();
        if labels.get(PAUSE_LABEL).map(String::as_str) == Some("true") {
            return Mutation::Unchanged;
        }
        labels.insert(PAUSE_LABEL.to_string(), "true".to_string());
        Mutation::Object
    })
}

fn remove_finalizer() -> MutateFn<'static> {
    Box::new(|bucket: &mut Bucket| {
        if !bucket.has_in_use_finalizer() {
            return Mutation::Unchanged;
        }
        bucket.finalizers_mut().retain(|f| f != IN_USE_FINALIZER);
        Mutation::Object
    })
}

/// Status write that is skipped when the update changes nothing
fn write_status<'a, F>(mut update: F) -> MutateFn<'a>
where
    F: FnMut(&mut BucketStatus) + Send + 'a,
{
    Box::new(move |bucket: &mut Bucket| {
        let mut status = bucket.status_or_default();
        update(&mut status);
        if bucket.status.as_ref() == Some(&status) {
            Mutation::Unchanged
        } else {
            bucket.status = Some(status);
            Mutation::Status
        }
    })
}
