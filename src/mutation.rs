//! Create/update/delete helpers that keep cached lists in step with the
//! backend.
//!
//! Each helper submits one request and, once it succeeds, invalidates the
//! resources it names so every list reading them refetches.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::{
    api::{ApiClient, FetchError},
    diff::engine::{DiffError, diff_records, diff_typed, is_empty_patch},
    record::{Patch, Record},
    runtime::handle::{CacheError, CacheHandle},
};

/// Failure of a mutation helper.
#[derive(Debug, Error)]
pub enum MutationError {
    /// The snapshots could not be diffed.
    #[error(transparent)]
    Diff(#[from] DiffError),
    /// The backend rejected the request; the message is passed through.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Invalidating the affected lists failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Submits writes through an [`ApiClient`] and invalidates the cache lists
/// they affect.
#[derive(Clone)]
pub struct Mutator {
    client: ApiClient,
    cache: CacheHandle,
}

impl Mutator {
    /// Helper sharing `client` and `cache`.
    pub fn new(client: ApiClient, cache: CacheHandle) -> Self {
        Self { client, cache }
    }

    /// PATCHes only the fields of `updated` that differ from `original`.
    ///
    /// When nothing changed, `original` is returned and no request or
    /// invalidation happens.
    pub async fn update(
        &self,
        endpoint: &str,
        original: &Record,
        updated: &Record,
        affects: &[&str],
    ) -> Result<Record, MutationError> {
        let patch = diff_records(original, updated);
        self.submit_patch(endpoint, original, patch, affects).await
    }

    /// [`Mutator::update`] for typed snapshots.
    pub async fn update_typed<T: Serialize>(
        &self,
        endpoint: &str,
        original: &T,
        updated: &T,
        affects: &[&str],
    ) -> Result<Record, MutationError> {
        let patch = diff_typed(original, updated)?;
        let original = match serde_json::to_value(original).map_err(DiffError::from)? {
            Value::Object(rec) => rec,
            _ => Record::new(),
        };
        self.submit_patch(endpoint, &original, patch, affects).await
    }

    /// POSTs `body` and returns the created record (or `body` when the
    /// server answers without one).
    pub async fn create(&self, endpoint: &str, body: Record, affects: &[&str]) -> Result<Record, MutationError> {
        let response = self.client.post(endpoint, Value::Object(body.clone())).await?;
        self.invalidate(affects).await?;
        Ok(match response {
            Value::Object(rec) => rec,
            _ => body,
        })
    }

    /// DELETEs `endpoint`.
    pub async fn delete(&self, endpoint: &str, affects: &[&str]) -> Result<(), MutationError> {
        self.client.delete(endpoint).await?;
        self.invalidate(affects).await?;
        Ok(())
    }

    async fn submit_patch(
        &self,
        endpoint: &str,
        original: &Record,
        patch: Patch,
        affects: &[&str],
    ) -> Result<Record, MutationError> {
        if is_empty_patch(&patch) {
            debug!(endpoint, "no fields changed, skipping request");
            return Ok(original.clone());
        }

        let mut merged = original.clone();
        patch.apply_to(&mut merged);

        let response = self.client.patch(endpoint, patch).await?;
        self.invalidate(affects).await?;
        Ok(match response {
            Value::Object(rec) => rec,
            _ => merged,
        })
    }

    async fn invalidate(&self, affects: &[&str]) -> Result<usize, CacheError> {
        let mut total = 0;
        for resource in affects {
            total += self.cache.invalidate_resource(*resource).await?;
        }
        Ok(total)
    }
}
