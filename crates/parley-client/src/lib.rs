//! # parley-client
//!
//! Conversation state for a messenger whose accounts, records and realtime
//! fan-out live in a hosted backend. The crate keeps a local cache of the
//! signed-in user's conversations and messages and merges paged history
//! with live change events without duplicating or reordering messages.
//!
//! Rendering is left to the consumer, which drives the client through
//! [`ParleyClient`] and follows [`ClientEvent`]s.

pub mod client;
pub mod commands;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod message_log;
pub mod messages;
pub mod pagination;
pub mod retry;
pub mod selector;
pub mod session;
pub mod state;
pub mod task;

mod rows;

pub use client::ParleyClient;
pub use commands::{Composer, RegistrationForm};
pub use config::ClientConfig;
pub use directory::{humanize_since, ChatSummary, ConversationDirectory};
pub use error::{ClientError, Result};
pub use events::{ClientEvent, EventBus, Route};
pub use message_log::MessageLog;
pub use messages::{LiveSubscription, MessageCache};
pub use pagination::{LoadOutcome, Paginator};
pub use retry::RetryPolicy;
pub use selector::{ConversationSelector, ConversationView};
pub use session::SessionHolder;
pub use state::{CacheState, Store};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default filter. Later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("parley_client=debug,parley_store=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
