pub mod backoff;
pub mod config;
pub mod error;
pub mod types;

pub use backoff::Backoff;
pub use error::{ChangeStreamsError, Result};
pub use types::{ChangeEvent, ConnId, EntityName, Operation};
