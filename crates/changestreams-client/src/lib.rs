//! `changestreams-client`: the consuming end of the change pipeline.
//!
//! [`router::SubscriptionRouter`] keeps one hub connection alive and joins
//! entity groups as views come and go. [`feed::EntityFeed`] turns the events
//! it receives into minimal mutations of a [`collection::BoundCollection`],
//! fetching fresh rows through a [`reconcile::Fetcher`] and applying them on
//! the UI owner via [`ui::UiHandle`].

pub mod collection;
pub mod error;
pub mod feed;
pub mod keyed;
pub mod reconcile;
pub mod router;
pub mod transport;
pub mod ui;

pub use collection::{BoundCollection, CollectionChange, Keyed, TrackedEntity};
pub use error::{ClientError, Result};
pub use feed::{EntityFeed, FeedBinding};
pub use keyed::KeyedSerializer;
pub use reconcile::{reconcile, Fetcher, Reconciled, SkipReason};
pub use router::{RouterHandle, RouterSettings, RouterState, SubscriptionRouter, ViewGuard};
pub use transport::{Connector, Transport, WsConnector};
pub use ui::{spawn_ui_thread, ui_queue, UiHandle, UiQueue};
