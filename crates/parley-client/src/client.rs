//! [`ParleyClient`]: every component wired over one backend and one cache.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use parley_shared::{AuthUser, Backend, Chat, Session};
use tokio::sync::broadcast;
use tracing::info;

use crate::commands::{self, Composer, RegistrationForm};
use crate::config::ClientConfig;
use crate::directory::{ChatSummary, ConversationDirectory};
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus};
use crate::messages::MessageCache;
use crate::pagination::LoadOutcome;
use crate::selector::{ConversationSelector, ConversationView};
use crate::session::SessionHolder;
use crate::state::Store;
use crate::task::BackgroundTask;

pub struct ParleyClient {
    backend: Arc<dyn Backend>,
    config: ClientConfig,
    store: Store,
    events: EventBus,
    session: SessionHolder,
    directory: ConversationDirectory,
    messages: Arc<MessageCache>,
    selector: Arc<ConversationSelector>,
    composer: Composer,
    directory_feed: Mutex<Option<BackgroundTask>>,
}

impl ParleyClient {
    pub fn new(backend: Arc<dyn Backend>, config: ClientConfig) -> Self {
        let store = Store::new();
        let events = EventBus::new();
        let retry = config.retry_policy();

        let directory =
            ConversationDirectory::new(backend.clone(), store.clone(), events.clone(), retry);
        let messages = Arc::new(MessageCache::new(
            backend.clone(),
            store.clone(),
            events.clone(),
            &config,
        ));
        let selector = Arc::new(ConversationSelector::new(
            store.clone(),
            events.clone(),
            messages.clone(),
            config.teardown_timeout,
        ));
        let session = SessionHolder::new(
            backend.clone(),
            store.clone(),
            events.clone(),
            directory.clone(),
            selector.clone(),
            retry,
        );
        let composer = Composer::new(backend.clone(), store.clone(), events.clone());

        Self {
            backend,
            config,
            store,
            events,
            session,
            directory,
            messages,
            selector,
            composer,
            directory_feed: Mutex::new(None),
        }
    }

    /// Mount the conversation feed, then resolve the session.
    pub async fn start(&self) -> Result<()> {
        let already_mounted = self.feed_slot().is_some();
        if !already_mounted {
            let feed = self.directory.mount().await.map_err(|e| {
                self.events.failure("mount_directory", &e);
                e
            })?;
            *self.feed_slot() = Some(feed);
        }
        self.session.start().await;
        info!("Client started");
        Ok(())
    }

    /// Close the active conversation and stop every background task.
    pub async fn shutdown(&self) {
        if let Err(e) = self.selector.select(None).await {
            tracing::debug!(error = %e, "Deselect on shutdown failed");
        }
        self.session.stop().await;
        let feed = self.feed_slot().take();
        if let Some(feed) = feed {
            feed.stop().await;
        }
        info!("Client stopped");
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> &SessionHolder {
        &self.session
    }

    pub fn directory(&self) -> &ConversationDirectory {
        &self.directory
    }

    pub fn messages(&self) -> &MessageCache {
        &self.messages
    }

    pub fn selector(&self) -> &ConversationSelector {
        &self.selector
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    // --- shortcuts -----------------------------------------------------

    pub async fn register(&self, form: RegistrationForm) -> Result<AuthUser> {
        commands::register(self.backend.as_ref(), &self.config, &self.events, form).await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        self.session.sign_in(email, password).await
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.session.sign_out().await
    }

    pub fn conversations(&self) -> Vec<ChatSummary> {
        self.directory.summaries(Utc::now())
    }

    pub async fn select(&self, chat: Option<Chat>) -> Result<()> {
        self.selector.select(chat).await
    }

    /// Load older history of the active conversation.
    pub async fn load_older(&self) -> Result<LoadOutcome> {
        let chat_id = self
            .selector
            .active_chat_id()
            .ok_or_else(|| ClientError::validation("No conversation selected"))?;
        self.messages.load_older(chat_id).await
    }

    pub fn view(&self) -> ConversationView {
        self.selector.view()
    }

    fn feed_slot(&self) -> std::sync::MutexGuard<'_, Option<BackgroundTask>> {
        self.directory_feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
