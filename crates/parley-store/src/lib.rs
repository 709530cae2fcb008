//! # parley-store
//!
//! Embedded reference backend for Parley, backed by SQLite.
//!
//! [`EmbeddedBackend`] implements the auth, record-store and change-feed
//! traits from `parley-shared` on top of a local [`Database`], so the client
//! core can run (and be tested) without the hosted service.

pub mod accounts;
pub mod backend;
pub mod database;
pub mod feed;
pub mod migrations;
pub mod records;

mod error;
mod tables;

pub use accounts::Account;
pub use backend::{EmbeddedBackend, Operation};
pub use database::Database;
pub use error::StoreError;
