//! `changestreams-hub`: WebSocket broadcast hub.
//!
//! Clients connect at `GET /ws`, authenticate, and join per-entity groups with
//! `subscribe` / `unsubscribe`. The [`hub::SubscriptionHub`] is the
//! [`ChangeSink`](changestreams_listener::ChangeSink) the database listener
//! forwards into.

pub mod app;
pub mod http;
pub mod hub;
pub mod ws;
