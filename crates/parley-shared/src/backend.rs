//! Narrow interface to the hosted backend.
//!
//! The client core never talks to a concrete service. It consumes three
//! capabilities, bundled as [`Backend`]:
//!
//! - [`AuthService`]: session lookup, session-change notifications, sign-up/in/out
//! - [`RecordStore`]: filtered, ordered, windowed reads and inserts of JSON rows
//! - [`ChangeFeed`]: row-level insert/update/delete notifications
//!
//! Rows travel as [`serde_json::Value`] objects whose keys are column names;
//! the typed models in [`crate::models`] deserialize from them.

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::BackendError;
use crate::models::{AuthUser, Session};

// ---------------------------------------------------------------------------
// Tables and queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Profiles,
    Chats,
    ChatParticipants,
    Messages,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profiles => "profiles",
            Self::Chats => "chats",
            Self::ChatParticipants => "chat_participants",
            Self::Messages => "messages",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Equality filter `column = value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Whether `row` carries `value` in `column`.
    pub fn matches(&self, row: &Value) -> bool {
        row.get(&self.column) == Some(&self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

/// Offset/limit window over the ordered result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub offset: usize,
    pub limit: usize,
}

/// Related rows to embed in each result row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Embed {
    /// `chats` rows gain `chat_participants: [{ profile_id, profiles: {..} }]`.
    Participants,
    /// `messages` rows gain `sender: { ..profile.. }`.
    Sender,
}

/// A read against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: Table,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub range: Option<Range>,
    pub embeds: Vec<Embed>,
}

impl Query {
    pub fn from(table: Table) -> Self {
        Self {
            table,
            filters: Vec::new(),
            order: None,
            range: None,
            embeds: Vec::new(),
        }
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    pub fn order(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order = Some(Order {
            column: column.into(),
            direction,
        });
        self
    }

    /// Inclusive row window `from..=to`.
    pub fn range(mut self, from: usize, to: usize) -> Self {
        self.range = Some(Range {
            offset: from,
            limit: to.saturating_sub(from) + 1,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.range = Some(Range { offset: 0, limit });
        self
    }

    pub fn embed(mut self, embed: Embed) -> Self {
        if !self.embeds.contains(&embed) {
            self.embeds.push(embed);
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Change notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Which change kinds a subscriber wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Only(ChangeKind),
}

impl EventFilter {
    pub fn accepts(&self, kind: ChangeKind) -> bool {
        match self {
            Self::All => true,
            Self::Only(wanted) => *wanted == kind,
        }
    }
}

/// A row-level change. `new` is set for inserts and updates, `old` for
/// updates and deletes.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub new: Option<Value>,
    pub old: Option<Value>,
}

impl ChangeEvent {
    /// The row the event is about: `new` when present, else `old`.
    pub fn record(&self) -> Option<&Value> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFilter {
    /// Channel name, used only for diagnostics.
    pub channel: String,
    pub table: Table,
    pub events: EventFilter,
    /// Server-side scope, e.g. `chat_id = <id>`.
    pub scope: Option<Filter>,
}

impl ChangeFilter {
    pub fn new(channel: impl Into<String>, table: Table) -> Self {
        Self {
            channel: channel.into(),
            table,
            events: EventFilter::All,
            scope: None,
        }
    }

    pub fn events(mut self, events: EventFilter) -> Self {
        self.events = events;
        self
    }

    pub fn scope(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.scope = Some(Filter::eq(column, value));
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table || !self.events.accepts(event.kind) {
            return false;
        }
        match (&self.scope, event.record()) {
            (None, _) => true,
            (Some(scope), Some(row)) => scope.matches(row),
            (Some(_), None) => false,
        }
    }
}

/// Auth state transition delivered to session listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SignedIn(Session),
    SignedOut,
}

/// A standing subscription. Events arrive through [`Subscription::recv`];
/// dropping the value unsubscribes.
pub struct Subscription<T> {
    id: u64,
    receiver: mpsc::UnboundedReceiver<T>,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl<T> Subscription<T> {
    pub fn new(
        id: u64,
        receiver: mpsc::UnboundedReceiver<T>,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            receiver,
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event. `None` once the producer is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Non-blocking poll, mostly useful in tests.
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

pub type SessionWatch = Subscription<SessionEvent>;

// ---------------------------------------------------------------------------
// Service traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AuthService: Send + Sync {
    /// One-shot lookup of the session currently held by the service.
    async fn current_session(&self) -> Result<Option<Session>, BackendError>;

    /// Standing listener for sign-in / sign-out transitions.
    fn on_session_change(&self) -> SessionWatch;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> Result<AuthUser, BackendError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, BackendError>;

    /// Insert one row and return it as stored (with server-filled columns).
    async fn insert(&self, table: Table, row: Value) -> Result<Value, BackendError>;
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(
        &self,
        filter: ChangeFilter,
    ) -> Result<Subscription<ChangeEvent>, BackendError>;
}

/// Everything the client core needs from the hosted service.
pub trait Backend: AuthService + RecordStore + ChangeFeed {}

impl<T: AuthService + RecordStore + ChangeFeed> Backend for T {}
