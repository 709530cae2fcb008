//! User-initiated actions.
//!
//! Every action returns a [`Result`](crate::error::Result) and reports its
//! failure on the event bus, so the UI can show it without inspecting the
//! error itself.

pub mod auth;
pub mod compose;
pub mod register;

pub use compose::Composer;
pub use register::{register, RegistrationForm};
