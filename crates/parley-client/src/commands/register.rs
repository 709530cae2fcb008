//! Account registration.

use parley_shared::constants::{
    PASSWORD_MIN_LEN, USERNAME_MAX_LEN, USERNAME_MIN_LEN, USERNAME_TAKEN,
};
use parley_shared::{AuthUser, Backend, NewProfile, Query, Table};
use serde_json::json;
use tracing::info;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus, Route};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationForm {
    pub email: String,
    pub password: String,
    pub username: String,
}

impl RegistrationForm {
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            username: username.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let len = self.username.chars().count();
        if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
            return Err(ClientError::Validation(format!(
                "Username must be between {USERNAME_MIN_LEN} and {USERNAME_MAX_LEN} characters"
            )));
        }
        if !self
            .username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ClientError::validation(
                "Username may only contain letters, digits and underscores",
            ));
        }
        if !self.email.contains('@') {
            return Err(ClientError::validation("Invalid email address"));
        }
        if self.password.chars().count() < PASSWORD_MIN_LEN {
            return Err(ClientError::Validation(format!(
                "Password must be at least {PASSWORD_MIN_LEN} characters"
            )));
        }
        Ok(())
    }
}

/// Create an account and its profile.
///
/// The username is checked before the auth identity is created, so a taken
/// name never leaves an orphan account behind. On success the UI is sent to
/// the login screen; registering does not sign in.
pub async fn register(
    backend: &dyn Backend,
    config: &ClientConfig,
    events: &EventBus,
    form: RegistrationForm,
) -> Result<AuthUser> {
    match create_account(backend, config, &form).await {
        Ok(user) => {
            info!(user = %user.id, username = %form.username, "Account registered");
            events.emit(ClientEvent::Navigate(Route::Login));
            Ok(user)
        }
        Err(e) => {
            events.failure("register", &e);
            Err(e)
        }
    }
}

async fn create_account(
    backend: &dyn Backend,
    config: &ClientConfig,
    form: &RegistrationForm,
) -> Result<AuthUser> {
    form.validate()?;

    let taken = backend
        .select(
            &Query::from(Table::Profiles)
                .eq("username", form.username.as_str())
                .limit(1),
        )
        .await?;
    if !taken.is_empty() {
        return Err(ClientError::Conflict(USERNAME_TAKEN.into()));
    }

    let user = backend
        .sign_up(
            &form.email,
            &form.password,
            json!({ "username": form.username }),
        )
        .await?;

    let profile = NewProfile {
        id: user.id,
        username: form.username.clone(),
        avatar_url: Some(config.avatar_for(&form.username)),
        status_message: config.default_status.clone(),
        is_online: true,
    };
    backend
        .insert(Table::Profiles, serde_json::to_value(&profile)?)
        .await
        .map_err(|e| match e {
            // Lost a race with another registration between check and insert.
            parley_shared::BackendError::Duplicate(_) => ClientError::Conflict(USERNAME_TAKEN.into()),
            other => other.into(),
        })?;

    Ok(user)
}
