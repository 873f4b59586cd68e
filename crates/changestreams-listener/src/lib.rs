//! `changestreams-listener`: database side of the change pipeline.
//!
//! [`emitter`] generates and installs the row-level triggers that publish a
//! uniform JSON payload with `pg_notify`. [`listener::ChangeListener`] holds
//! the single LISTEN connection for the process and forwards each decoded
//! [`ChangeEvent`](changestreams_core::ChangeEvent) to a [`ChangeSink`].

pub mod emitter;
pub mod error;
pub mod listener;

pub use error::{ListenerError, Result};
pub use listener::{decode_payload, forward, ChangeListener, ChangeSink, ListenerStatus};
