//! [`EmbeddedBackend`]: a self-contained implementation of the hosted
//! backend interface over a local SQLite database.
//!
//! It behaves like the hosted service from the client's point of view:
//! chats are only readable by their participants, message inserts require
//! the sender to be signed in and bump the parent chat's `updated_at`, and
//! every write is fanned out to matching change subscribers. Test hooks
//! allow injecting failures and latency, counting calls and re-delivering
//! events.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use parley_shared::{
    AuthService, AuthUser, BackendError, ChangeEvent, ChangeFeed, ChangeFilter, ChangeKind,
    Filter, ProfileId, Query, RecordStore, Session, SessionEvent, SessionWatch, Subscription,
    Table,
};
use rand::RngCore;
use serde_json::Value;
use tracing::{debug, info};

use crate::database::Database;
use crate::error::StoreError;
use crate::feed::{Everything, Fanout};

/// Backend calls that can be counted and made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CurrentSession,
    SignUp,
    SignIn,
    SignOut,
    Select,
    Insert,
    Subscribe,
}

const OPERATIONS: usize = 7;

impl Operation {
    fn index(self) -> usize {
        self as usize
    }
}

pub struct EmbeddedBackend {
    db: Mutex<Database>,
    session: Mutex<Option<Session>>,
    changes: Fanout<ChangeEvent, ChangeFilter>,
    sessions: Fanout<SessionEvent, Everything>,
    faults: Mutex<HashMap<Operation, VecDeque<BackendError>>>,
    latency: Mutex<Option<Duration>>,
    calls: [AtomicUsize; OPERATIONS],
}

impl EmbeddedBackend {
    pub fn new(db: Database) -> Self {
        Self {
            db: Mutex::new(db),
            session: Mutex::new(None),
            changes: Fanout::new(),
            sessions: Fanout::new(),
            faults: Mutex::new(HashMap::new()),
            latency: Mutex::new(None),
            calls: Default::default(),
        }
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open_at(path)?))
    }

    // ------------------------------------------------------------------
    // Test hooks
    // ------------------------------------------------------------------

    /// Make the next `times` calls of `op` fail with `error`.
    pub fn fail_next(&self, op: Operation, times: usize, error: BackendError) {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = faults.entry(op).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Delay every subsequent call by `latency` (or remove the delay).
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// How many times `op` has been invoked (including failed calls).
    pub fn calls(&self, op: Operation) -> usize {
        self.calls[op.index()].load(Ordering::SeqCst)
    }

    /// Number of open change subscriptions on `table`.
    pub fn active_subscriptions(&self, table: Table) -> usize {
        self.changes.count_where(|f| f.table == table)
    }

    pub fn session_listeners(&self) -> usize {
        self.sessions.len()
    }

    /// Deliver a raw change event to subscribers, as an at-least-once
    /// transport may do on reconnect.
    pub fn publish_change(&self, event: ChangeEvent) -> usize {
        self.changes.publish(&event)
    }

    /// Run `f` against the underlying database (seeding, inspection).
    pub fn with_database<R>(&self, f: impl FnOnce(&Database) -> R) -> R {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        f(&db)
    }

    // ------------------------------------------------------------------
    // Writes beyond the client interface
    // ------------------------------------------------------------------

    /// Update matching rows and publish one `Update` event per row.
    pub fn update_rows(
        &self,
        table: Table,
        filters: &[Filter],
        patch: Value,
    ) -> Result<Vec<Value>, BackendError> {
        let changed = self.with_database(|db| db.update_rows(table, filters, &patch))?;
        let mut rows = Vec::with_capacity(changed.len());
        for (old, new) in changed {
            self.changes.publish(&ChangeEvent {
                table,
                kind: ChangeKind::Update,
                new: Some(new.clone()),
                old: Some(old),
            });
            rows.push(new);
        }
        Ok(rows)
    }

    /// Delete matching rows and publish one `Delete` event per row.
    pub fn delete_rows(&self, table: Table, filters: &[Filter]) -> Result<Vec<Value>, BackendError> {
        let deleted = self.with_database(|db| db.delete_rows(table, filters))?;
        for old in &deleted {
            self.changes.publish(&ChangeEvent {
                table,
                kind: ChangeKind::Delete,
                new: None,
                old: Some(old.clone()),
            });
        }
        Ok(deleted)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn enter(&self, op: Operation) -> Result<(), BackendError> {
        self.calls[op.index()].fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let fault = self
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        match fault {
            Some(err) => {
                debug!(?op, error = %err, "injected failure");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn viewer(&self) -> Option<ProfileId> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.user.id)
    }
}

#[async_trait]
impl AuthService for EmbeddedBackend {
    async fn current_session(&self) -> Result<Option<Session>, BackendError> {
        self.enter(Operation::CurrentSession).await?;
        Ok(self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn on_session_change(&self) -> SessionWatch {
        self.sessions.subscribe(Everything)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: Value,
    ) -> Result<AuthUser, BackendError> {
        self.enter(Operation::SignUp).await?;

        if !email.contains('@') {
            return Err(BackendError::Rejected("Unable to validate email address".into()));
        }
        if password.len() < 6 {
            return Err(BackendError::Rejected(
                "Password should be at least 6 characters".into(),
            ));
        }

        let account = self.with_database(|db| db.create_account(email, password, &metadata))?;
        Ok(account.into())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        self.enter(Operation::SignIn).await?;

        let account = self.with_database(|db| db.verify_credentials(email, password))?;

        let mut token = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut token);
        let session = Session {
            user: account.into(),
            access_token: hex::encode(token),
        };

        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        info!(user = %session.user.id, "signed in");
        self.sessions.publish(&SessionEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.enter(Operation::SignOut).await?;

        let previous = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = previous {
            info!(user = %session.user.id, "signed out");
            self.sessions.publish(&SessionEvent::SignedOut);
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for EmbeddedBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, BackendError> {
        self.enter(Operation::Select).await?;
        let viewer = self.viewer();
        Ok(self.with_database(|db| db.select_rows(query, viewer))?)
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value, BackendError> {
        self.enter(Operation::Insert).await?;

        if table == Table::Messages {
            let sender = row.get("sender_id").and_then(Value::as_str);
            match self.viewer() {
                Some(viewer) if sender == Some(viewer.to_string().as_str()) => {}
                Some(_) => {
                    return Err(BackendError::Unauthorized(
                        "sender_id does not match the signed-in user".into(),
                    ))
                }
                None => return Err(BackendError::Unauthorized("not signed in".into())),
            }
        }

        let (stored, touched) = self.with_database(|db| -> Result<_, StoreError> {
            let stored = db.insert_row(table, &row)?;
            let touched = match (table, stored.get("chat_id"), stored.get("created_at")) {
                (Table::Messages, Some(Value::String(chat)), Some(Value::String(at))) => {
                    db.touch_chat(chat, at)?
                }
                _ => None,
            };
            Ok((stored, touched))
        })?;

        let delivered = self.changes.publish(&ChangeEvent {
            table,
            kind: ChangeKind::Insert,
            new: Some(stored.clone()),
            old: None,
        });
        debug!(%table, delivered, "row inserted");

        if let Some((old, new)) = touched {
            self.changes.publish(&ChangeEvent {
                table: Table::Chats,
                kind: ChangeKind::Update,
                new: Some(new),
                old: Some(old),
            });
        }

        Ok(stored)
    }
}

#[async_trait]
impl ChangeFeed for EmbeddedBackend {
    async fn subscribe(
        &self,
        filter: ChangeFilter,
    ) -> Result<Subscription<ChangeEvent>, BackendError> {
        self.enter(Operation::Subscribe).await?;
        debug!(channel = %filter.channel, table = %filter.table, "change subscription opened");
        Ok(self.changes.subscribe(filter))
    }
}
