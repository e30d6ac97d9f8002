//! Optimistic persistence of bucket records
//!
//! Every change to a Bucket goes through a fetch-mutate-persist loop that
//! re-reads the record before each attempt and retries only on conflicts.
//! A record that disappears mid-sequence ends the loop without an error.

use std::future::Future;

use tracing::{debug, info};

use crate::adapters::RecordStore;
use crate::config::RetryConfig;
use crate::crd::Bucket;
use crate::error::Result;
use crate::metrics;

/// What a mutation callback changed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mutation {
    /// Nothing to write
    Unchanged,
    /// Metadata or spec changed; write the whole object
    Object,
    /// Only the status changed; write the status subresource
    Status,
}

/// Callback applied to the freshest copy of a record
pub type MutateFn<'a> = Box<dyn FnMut(&mut Bucket) -> Mutation + Send + 'a>;

/// Fetch, mutate and persist a value, retrying on conflicts
///
/// Returns `Ok(None)` when the value no longer exists.
pub async fn with_retry<T, Fetch, FetchFut, Mutate, Persist, PersistFut>(
    retry: &RetryConfig,
    name: &str,
    mut fetch: Fetch,
    mut mutate: Mutate,
    mut persist: Persist,
) -> Result<Option<T>>
where
    Fetch: FnMut() -> FetchFut,
    FetchFut: Future<Output = Result<T>>,
    Mutate: FnMut(&mut T) -> Mutation,
    Persist: FnMut(T, Mutation) -> PersistFut,
    PersistFut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let mut current = match fetch().await {
            Ok(current) => current,
            Err(e) if e.is_not_found() => {
                info!(bucket = %name, "Record no longer exists, skipping update");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let mutation = mutate(&mut current);
        if mutation == Mutation::Unchanged {
            return Ok(Some(current));
        }

        match persist(current, mutation).await {
            Ok(written) => return Ok(Some(written)),
            Err(e) if e.is_not_found() => {
                info!(bucket = %name, "Record deleted while updating, skipping update");
                return Ok(None);
            }
            Err(e) if e.is_conflict() && attempt + 1 < retry.max_attempts => {
                metrics::PERSIST_CONFLICTS.inc();
                let backoff = retry.backoff(attempt);
                debug!(bucket = %name, attempt, ?backoff, error = %e, "Conflict while updating record, retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Apply callbacks to a record one after another
///
/// Each callback sees the record as left by the previous one. Returns the
/// last written copy, or `None` when the record was deleted along the way.
pub async fn apply_mutations(
    store: &dyn RecordStore,
    name: &str,
    retry: &RetryConfig,
    callbacks: Vec<MutateFn<'_>>,
) -> Result<Option<Bucket>> {
    let mut latest = None;
    for mut callback in callbacks {
        latest = with_retry(
            retry,
            name,
            || store.get(name),
            |bucket| callback(bucket),
            |bucket, mutation| persist(store, bucket, mutation),
        )
        .await?;
    }
    Ok(latest)
}

async fn persist(store: &dyn RecordStore, bucket: Bucket, mutation: Mutation) -> Result<Bucket> {
    match mutation {
        Mutation::Status => store.update_status(&bucket).await,
        Mutation::Object | Mutation::Unchanged => store.update(&bucket).await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use kube::ResourceExt;

    use super::*;
    use crate::adapters::MemoryRecordStore;
    use crate::crd::{BucketSpec, BucketStatus, Condition, READY};
    use crate::error::Error;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 5,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    fn set_label(key: &'static str) -> MutateFn<'static> {
        Box::new(move |bucket: &mut Bucket| {
            bucket.labels_mut().insert(key.to_string(), "true".to_string());
            Mutation::Object
        })
    }

    #[tokio::test]
    async fn conflicts_are_retried_against_fresh_copy() {
        let store = MemoryRecordStore::new();
        store.insert(Bucket::new("b", BucketSpec::default()));
        store.inject_conflicts(2);

        let written = apply_mutations(&store, "b", &fast_retry(), vec![set_label("x")])
            .await
            .unwrap()
            .unwrap();

        assert!(written.labels().contains_key("x"));
        assert_eq!(store.object_writes(), 1);
    }

    #[tokio::test]
    async fn conflicts_exhaust_after_max_attempts() {
        let store = MemoryRecordStore::new();
        store.insert(Bucket::new("b", BucketSpec::default()));
        store.inject_conflicts(10);

        let err = apply_mutations(&store, "b", &fast_retry(), vec![set_label("x")])
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn missing_record_is_a_no_op() {
        let store = MemoryRecordStore::new();
        let result = apply_mutations(&store, "gone", &fast_retry(), vec![set_label("x")])
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn later_callbacks_see_earlier_changes() {
        let store = MemoryRecordStore::new();
        store.insert(Bucket::new("b", BucketSpec::default()));

        let callbacks: Vec<MutateFn<'_>> = vec![
            set_label("first"),
            Box::new(|bucket: &mut Bucket| {
                let mut status = BucketStatus::default();
                if bucket.labels().contains_key("first") {
                    status.set_condition(Condition::available());
                }
                bucket.status = Some(status);
                Mutation::Status
            }),
        ];
        let written = apply_mutations(&store, "b", &fast_retry(), callbacks)
            .await
            .unwrap()
            .unwrap();

        assert!(written.status.unwrap().condition(READY).unwrap().is_available());
        assert_eq!(store.status_writes(), 1);
    }

    #[tokio::test]
    async fn unchanged_mutation_skips_write() {
        let store = MemoryRecordStore::new();
        store.insert(Bucket::new("b", BucketSpec::default()));

        let callbacks: Vec<MutateFn<'_>> = vec![Box::new(|_: &mut Bucket| Mutation::Unchanged)];
        apply_mutations(&store, "b", &fast_retry(), callbacks).await.unwrap();

        assert_eq!(store.object_writes() + store.status_writes(), 0);
    }

    #[test]
    fn non_conflict_errors_abort_immediately() {
        let retry = fast_retry();
        let mut persists = 0;
        let result: Result<Option<u32>> = tokio_test::block_on(with_retry(
            &retry,
            "n",
            || async { Ok(1u32) },
            |_| Mutation::Object,
            |_, _| {
                persists += 1;
                async { Err(Error::storage("disk full")) }
            },
        ));
        assert!(result.is_err());
        assert_eq!(persists, 1);
    }
}
