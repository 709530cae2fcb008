//! Session holder: the signed-in identity and everything that follows from
//! it.
//!
//! The current session is resolved once at start-up; after that a standing
//! listener reacts to sign-in and sign-out. Signing in installs the identity,
//! fetches the user's profile and loads the conversation list. Signing out
//! closes the active conversation, clears the whole cache and sends the UI
//! back to the login screen.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use parley_shared::{AuthUser, Backend, Profile, ProfileId, Query, Session, SessionEvent, Table};
use tracing::{debug, info, warn};

use crate::commands::auth;
use crate::directory::ConversationDirectory;
use crate::error::Result;
use crate::events::{ClientEvent, EventBus, Route};
use crate::retry::RetryPolicy;
use crate::rows::decode_rows;
use crate::selector::ConversationSelector;
use crate::state::Store;
use crate::task::BackgroundTask;

pub struct SessionHolder {
    inner: Arc<SessionInner>,
    listener: Mutex<Option<BackgroundTask>>,
}

struct SessionInner {
    backend: Arc<dyn Backend>,
    store: Store,
    events: EventBus,
    directory: ConversationDirectory,
    selector: Arc<ConversationSelector>,
    retry: RetryPolicy,
    loading: AtomicBool,
}

impl SessionHolder {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Store,
        events: EventBus,
        directory: ConversationDirectory,
        selector: Arc<ConversationSelector>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                backend,
                store,
                events,
                directory,
                selector,
                retry,
                loading: AtomicBool::new(true),
            }),
            listener: Mutex::new(None),
        }
    }

    /// Resolve the current session and start listening for changes.
    /// Calling it again while the listener runs does nothing.
    pub async fn start(&self) {
        if self.listener_slot().is_some() {
            return;
        }

        // Listen before resolving so a change in between is not lost.
        let mut watch = self.inner.backend.on_session_change();

        match self.inner.backend.current_session().await {
            Ok(Some(session)) => self.inner.signed_in(session).await,
            Ok(None) => debug!("No existing session"),
            Err(e) => {
                let e = crate::error::ClientError::from(e);
                self.inner.events.failure("restore_session", &e);
            }
        }
        self.inner.loading.store(false, Ordering::SeqCst);
        self.inner.events.emit(ClientEvent::SessionChanged);

        let inner = self.inner.clone();
        let task = BackgroundTask::spawn("session_listener", async move {
            while let Some(event) = watch.recv().await {
                match event {
                    SessionEvent::SignedIn(session) => inner.signed_in(session).await,
                    SessionEvent::SignedOut => inner.signed_out().await,
                }
            }
            warn!("Session change feed ended");
        });
        *self.listener_slot() = Some(task);
        info!("Session holder started");
    }

    /// Stop listening for session changes.
    pub async fn stop(&self) {
        let task = self.listener_slot().take();
        if let Some(task) = task {
            task.stop().await;
        }
    }

    /// `true` until the initial session has been resolved.
    pub fn is_loading(&self) -> bool {
        self.inner.loading.load(Ordering::SeqCst)
    }

    pub fn auth_user(&self) -> Option<AuthUser> {
        self.inner.store.read(|s| s.auth_user().cloned())
    }

    pub fn current_user(&self) -> Option<Profile> {
        self.inner.store.read(|s| s.current_user().cloned())
    }

    /// Where a request for `requested` should land. Protected screens need a
    /// session; the login and register screens redirect signed-in users to
    /// their chats. `None` while the session is still loading.
    pub fn resolve_route(&self, requested: Route) -> Option<Route> {
        if self.is_loading() {
            return None;
        }
        let signed_in = self.inner.store.read(|s| s.auth_user().is_some());
        Some(match (requested.is_protected(), signed_in) {
            (true, false) => Route::Login,
            (false, true) => Route::Chats,
            _ => requested,
        })
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        auth::sign_in(self.inner.backend.as_ref(), &self.inner.events, email, password).await
    }

    pub async fn sign_out(&self) -> Result<()> {
        auth::sign_out(self.inner.backend.as_ref(), &self.inner.events).await
    }

    fn listener_slot(&self) -> std::sync::MutexGuard<'_, Option<BackgroundTask>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionInner {
    async fn signed_in(&self, session: Session) {
        let user_id = session.user.id;
        self.store.write(|s| s.set_auth_user(session.user));
        info!(user = %user_id, "Session active");
        self.events.emit(ClientEvent::SessionChanged);

        match self.fetch_profile(user_id).await {
            Ok(Some(profile)) => {
                if self.store.write(|s| s.set_current_user(profile)) {
                    debug!(user = %user_id, "Profile installed");
                    self.events.emit(ClientEvent::SessionChanged);
                }
            }
            Ok(None) => warn!(user = %user_id, "Signed-in user has no profile"),
            Err(e) => self.events.failure("load_profile", &e),
        }

        if let Err(e) = self.directory.refresh().await {
            self.events.failure("load_conversations", &e);
        }
    }

    async fn signed_out(&self) {
        if let Err(e) = self.selector.select(None).await {
            debug!(error = %e, "Deselect on sign-out failed");
        }
        self.store.write(|s| s.clear());
        info!("Session ended, cache cleared");
        self.events.emit(ClientEvent::SessionChanged);
        self.events.emit(ClientEvent::Navigate(Route::Login));
    }

    async fn fetch_profile(&self, id: ProfileId) -> Result<Option<Profile>> {
        let query = Query::from(Table::Profiles).eq("id", id.to_string()).limit(1);
        let backend = &self.backend;
        let query = &query;
        let mut profiles = self
            .retry
            .run("load_profile", || async move {
                decode_rows::<Profile>(backend.select(query).await?)
            })
            .await?;
        Ok(profiles.pop())
    }
}
