//! Apply one change event to a bound collection.
//!
//! Fetches happen on the caller's task. Only the final mutation runs on the
//! UI owner, and it re-checks the collection there, so a change that raced
//! the fetch can never produce a duplicate or a half-applied update.

use async_trait::async_trait;
use changestreams_core::{ChangeEvent, Operation};
use tracing::{debug, warn};

use crate::collection::{BoundCollection, Keyed, TrackedEntity};
use crate::error::Result;
use crate::ui::UiHandle;

/// Loads one row by key through the application's data layer.
///
/// `Ok(None)` means the row is gone or not visible to this user.
#[async_trait]
pub trait Fetcher<T: Keyed>: Send + Sync {
    async fn fetch_by_id(&self, id: &T::Key) -> Result<Option<T>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Inserted { index: usize },
    Replaced { index: usize },
    Removed { index: usize },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Event is for another entity.
    WrongEntity,
    /// `entityId` does not parse as the collection's key type.
    BadKey,
    /// INSERT for a key the collection already holds.
    AlreadyPresent,
    /// UPDATE or DELETE for a row outside the loaded view.
    NotLoaded,
    NotFound,
    FetchFailed,
    /// The UI owner has shut down.
    UiClosed,
}

/// Reconcile `event` into the collection owned by `ui`. Never fails.
pub async fn reconcile<T, F>(
    ui: &UiHandle<BoundCollection<T>>,
    event: &ChangeEvent,
    fetcher: &F,
) -> Reconciled
where
    T: TrackedEntity,
    F: Fetcher<T> + ?Sized,
{
    if event.entity_name != T::ENTITY {
        return Reconciled::Skipped(SkipReason::WrongEntity);
    }
    let Ok(key) = event.entity_id.parse::<T::Key>() else {
        warn!(entity = %event.entity_name, entity_id = %event.entity_id, "unparseable entity id");
        return Reconciled::Skipped(SkipReason::BadKey);
    };

    let outcome = match event.operation {
        Operation::Insert => {
            match contains(ui, &key).await {
                Some(false) => {}
                Some(true) => return Reconciled::Skipped(SkipReason::AlreadyPresent),
                None => return Reconciled::Skipped(SkipReason::UiClosed),
            }
            let item = match fetch(fetcher, &key).await {
                Ok(item) => item,
                Err(reason) => return Reconciled::Skipped(reason),
            };
            ui.query(move |items| match items.insert_unique(item) {
                Some(index) => Reconciled::Inserted { index },
                None => Reconciled::Skipped(SkipReason::AlreadyPresent),
            })
            .await
        }
        Operation::Update => {
            match contains(ui, &key).await {
                Some(true) => {}
                Some(false) => return Reconciled::Skipped(SkipReason::NotLoaded),
                None => return Reconciled::Skipped(SkipReason::UiClosed),
            }
            let item = match fetch(fetcher, &key).await {
                Ok(item) => item,
                Err(reason) => return Reconciled::Skipped(reason),
            };
            // a DELETE may have landed while fetching; replace() then finds nothing
            ui.query(move |items| match items.replace(item) {
                Some(index) => Reconciled::Replaced { index },
                None => Reconciled::Skipped(SkipReason::NotLoaded),
            })
            .await
        }
        Operation::Delete => {
            ui.query(move |items| match items.remove(&key) {
                Some(index) => Reconciled::Removed { index },
                None => Reconciled::Skipped(SkipReason::NotLoaded),
            })
            .await
        }
    };

    let outcome = outcome.unwrap_or(Reconciled::Skipped(SkipReason::UiClosed));
    debug!(
        entity = %event.entity_name,
        operation = %event.operation,
        entity_id = %event.entity_id,
        ?outcome,
        "reconciled"
    );
    outcome
}

/// `None` once the UI owner is gone.
async fn contains<T: TrackedEntity>(ui: &UiHandle<BoundCollection<T>>, key: &T::Key) -> Option<bool> {
    let key = key.clone();
    ui.query(move |items| items.contains(&key)).await.ok()
}

async fn fetch<T, F>(fetcher: &F, key: &T::Key) -> std::result::Result<T, SkipReason>
where
    T: TrackedEntity,
    F: Fetcher<T> + ?Sized,
{
    match fetcher.fetch_by_id(key).await {
        Ok(Some(item)) => Ok(item),
        Ok(None) => {
            debug!(entity = %T::ENTITY, ?key, "row not found, skipping");
            Err(SkipReason::NotFound)
        }
        Err(e) => {
            warn!(entity = %T::ENTITY, ?key, error = %e, "fetch failed, skipping");
            Err(SkipReason::FetchFailed)
        }
    }
}
