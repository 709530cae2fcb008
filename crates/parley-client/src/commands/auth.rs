use parley_shared::{Backend, Session};
use tracing::info;

use crate::error::{ClientError, Result};
use crate::events::EventBus;

/// Sign in with email and password. The session listener picks up the
/// resulting session change and loads the user's data.
pub async fn sign_in(
    backend: &dyn Backend,
    events: &EventBus,
    email: &str,
    password: &str,
) -> Result<Session> {
    let result = async {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ClientError::validation("Email and password are required"));
        }
        Ok(backend.sign_in(email.trim(), password).await?)
    }
    .await;

    match result {
        Ok(session) => {
            info!(user = %session.user.id, "Signed in");
            Ok(session)
        }
        Err(e) => {
            events.failure("sign_in", &e);
            Err(e)
        }
    }
}

pub async fn sign_out(backend: &dyn Backend, events: &EventBus) -> Result<()> {
    match backend.sign_out().await {
        Ok(()) => {
            info!("Signed out");
            Ok(())
        }
        Err(e) => {
            let e = ClientError::from(e);
            events.failure("sign_out", &e);
            Err(e)
        }
    }
}
