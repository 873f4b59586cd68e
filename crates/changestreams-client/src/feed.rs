use std::sync::Arc;

use changestreams_core::ChangeEvent;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::collection::{BoundCollection, TrackedEntity};
use crate::keyed::KeyedSerializer;
use crate::reconcile::{reconcile, Fetcher};
use crate::router::{RouterHandle, ViewGuard};
use crate::ui::UiHandle;

/// Live binding of one entity type's collection to the change stream.
///
/// Events for other entities are ignored. Events for the same id are
/// reconciled strictly one after another; different ids run concurrently.
pub struct EntityFeed<T: TrackedEntity> {
    ui: UiHandle<BoundCollection<T>>,
    fetcher: Arc<dyn Fetcher<T>>,
    serializer: KeyedSerializer<T::Key>,
}

impl<T: TrackedEntity> Clone for EntityFeed<T> {
    fn clone(&self) -> Self {
        Self {
            ui: self.ui.clone(),
            fetcher: self.fetcher.clone(),
            serializer: self.serializer.clone(),
        }
    }
}

impl<T: TrackedEntity> EntityFeed<T> {
    pub fn new(ui: UiHandle<BoundCollection<T>>, fetcher: Arc<dyn Fetcher<T>>) -> Self {
        Self {
            ui,
            fetcher,
            serializer: KeyedSerializer::new(),
        }
    }

    /// Queue `event` for reconciliation. Returns false if it was not for this feed.
    pub fn dispatch(&self, event: ChangeEvent) -> bool {
        if event.entity_name != T::ENTITY {
            return false;
        }
        let Ok(key) = event.entity_id.parse::<T::Key>() else {
            warn!(entity = %T::ENTITY, entity_id = %event.entity_id, "unparseable entity id");
            return false;
        };

        let ui = self.ui.clone();
        let fetcher = self.fetcher.clone();
        self.serializer.dispatch(key, async move {
            reconcile(&ui, &event, fetcher.as_ref()).await;
        });
        true
    }

    /// Subscribe through `router` and reconcile its events until the
    /// returned binding is dropped.
    pub fn attach(self, router: &RouterHandle) -> FeedBinding {
        let mut events = router.events();
        let view = router.view_appeared(T::ENTITY);

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        self.dispatch(event);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(entity = %T::ENTITY, missed, "feed lagged, events lost until next refresh");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(entity = %T::ENTITY, "feed detached");
        });

        FeedBinding { _view: view, task }
    }
}

/// Keeps a feed attached. Dropping it unsubscribes and stops dispatching.
pub struct FeedBinding {
    _view: ViewGuard,
    task: JoinHandle<()>,
}

impl Drop for FeedBinding {
    fn drop(&mut self) {
        self.task.abort();
    }
}
