//! Trip group resolution
//!
//! Maps a trip onto the single group owning its identity key, creating the
//! group on first sight. Concurrent jobs may race to create the same group;
//! the loser of the race sees a uniqueness conflict and adopts the winner's
//! row instead of failing.

use chrono::NaiveDateTime;
use tracing::debug;
use tripmesh_common::config::IngestSettings;

use crate::clustering::group_key;
use crate::error::{IngestError, IngestResult};
use crate::models::{GroupId, GroupKey};

/// Outcome of a failed group insert
#[derive(Debug)]
pub enum InsertGroupError {
    /// Another writer already holds the identity key
    Conflict,
    /// Any other storage failure
    Store(tripmesh_common::Error),
}

/// Storage contract the resolver needs: keyed lookup plus conflict-aware insert
#[allow(async_fn_in_trait)]
pub trait GroupStore {
    async fn find_group(&mut self, key: &GroupKey) -> tripmesh_common::Result<Option<GroupId>>;

    async fn insert_group(
        &mut self,
        key: &GroupKey,
        bucket_minutes: u32,
    ) -> Result<GroupId, InsertGroupError>;
}

/// Resolve the group for one trip, creating it when absent
pub async fn resolve_group<S: GroupStore>(
    store: &mut S,
    settings: &IngestSettings,
    region: &str,
    origin: (f64, f64),
    destination: (f64, f64),
    started_at: NaiveDateTime,
) -> IngestResult<GroupId> {
    let key = group_key(settings, region, origin, destination, started_at);
    resolve_key(store, settings, &key).await
}

/// Resolve an already derived identity key.
///
/// A uniqueness conflict triggers a re-lookup, at most
/// `settings.max_conflict_retries` times.
pub async fn resolve_key<S: GroupStore>(
    store: &mut S,
    settings: &IngestSettings,
    key: &GroupKey,
) -> IngestResult<GroupId> {
    if let Some(id) = store.find_group(key).await? {
        return Ok(id);
    }

    for attempt in 1..=settings.max_conflict_retries {
        match store.insert_group(key, settings.time_bucket_minutes).await {
            Ok(id) => {
                debug!(group_id = id, key = %key, "Created trip group");
                return Ok(id);
            }
            Err(InsertGroupError::Conflict) => {
                debug!(key = %key, attempt, "Trip group created concurrently, re-reading");
                if let Some(id) = store.find_group(key).await? {
                    return Ok(id);
                }
            }
            Err(InsertGroupError::Store(err)) => return Err(IngestError::Persistence(err)),
        }
    }

    Err(IngestError::Persistence(tripmesh_common::Error::Internal(format!(
        "Trip group {} still missing after {} conflicting inserts",
        key, settings.max_conflict_retries
    ))))
}
