//! # parley-shared
//!
//! Types shared by every Parley crate: identifiers, the domain records the
//! hosted backend stores, the backend interface traits and the error types
//! that cross crate boundaries.

pub mod backend;
pub mod constants;
pub mod error;
pub mod models;
pub mod types;

pub use backend::{
    AuthService, Backend, ChangeEvent, ChangeFeed, ChangeFilter, ChangeKind, Direction, Embed,
    EventFilter, Filter, Query, RecordStore, SessionEvent, SessionWatch, Subscription, Table,
};
pub use error::{BackendError, ModelError};
pub use models::*;
pub use types::*;
