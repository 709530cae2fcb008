//! Auth identities (`auth_users`).
//!
//! Passwords are stored as a BLAKE3 `derive_key` hash over a random salt and
//! the password bytes.

use chrono::{DateTime, Utc};
use parley_shared::{AuthUser, ProfileId};
use rand::RngCore;
use rusqlite::params;
use serde_json::Value;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::tables::now_ts;

const PASSWORD_KDF_CONTEXT: &str = "parley-password-v1";
const SALT_LEN: usize = 16;

/// A registered auth identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: ProfileId,
    pub email: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl From<Account> for AuthUser {
    fn from(account: Account) -> Self {
        AuthUser {
            id: account.id,
            email: account.email,
            metadata: account.metadata,
        }
    }
}

impl Database {
    /// Register a new identity. Fails with [`StoreError::Conflict`] when the
    /// email is already known.
    pub fn create_account(&self, email: &str, password: &str, metadata: &Value) -> Result<Account> {
        let email = email.trim();
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM auth_users WHERE email = ?1)",
            params![email],
            |row| row.get(0),
        )?;
        if exists {
            return Err(StoreError::Conflict("User already registered".into()));
        }

        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);

        let id = Uuid::new_v4();
        let created_at = now_ts();
        self.conn().execute(
            "INSERT INTO auth_users (id, email, password_hash, salt, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.to_string(),
                email,
                hash_password(&salt, password),
                hex::encode(salt),
                serde_json::to_string(metadata)?,
                created_at,
            ],
        )?;

        tracing::info!(user = %id, "auth identity created");
        self.get_account(ProfileId(id))
    }

    /// Check an email/password pair and return the matching identity.
    pub fn verify_credentials(&self, email: &str, password: &str) -> Result<Account> {
        let found = self.conn().query_row(
            "SELECT id, password_hash, salt FROM auth_users WHERE email = ?1",
            params![email.trim()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        );

        let (id, stored_hash, salt_hex) = match found {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(StoreError::Unauthorized("Invalid login credentials".into()))
            }
            Err(e) => return Err(e.into()),
        };

        let salt = hex::decode(salt_hex)
            .map_err(|e| StoreError::Invalid(format!("corrupt salt: {e}")))?;
        if hash_password(&salt, password) != stored_hash {
            return Err(StoreError::Unauthorized("Invalid login credentials".into()));
        }

        self.get_account(ProfileId(Uuid::parse_str(&id)?))
    }

    pub fn get_account(&self, id: ProfileId) -> Result<Account> {
        let (email, metadata, created_at) = self
            .conn()
            .query_row(
                "SELECT email, metadata, created_at FROM auth_users WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;

        Ok(Account {
            id,
            email,
            metadata: serde_json::from_str(&metadata)?,
            created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        })
    }
}

fn hash_password(salt: &[u8], password: &str) -> String {
    let mut hasher = blake3::Hasher::new_derive_key(PASSWORD_KDF_CONTEXT);
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_then_verify() {
        let db = Database::open_in_memory().unwrap();
        let account = db
            .create_account("a@example.com", "hunter22", &json!({ "username": "alice" }))
            .unwrap();
        assert_eq!(account.metadata["username"], "alice");

        let verified = db.verify_credentials("a@example.com", "hunter22").unwrap();
        assert_eq!(verified.id, account.id);
    }

    #[test]
    fn wrong_password_is_unauthorized() {
        let db = Database::open_in_memory().unwrap();
        db.create_account("a@example.com", "hunter22", &json!({}))
            .unwrap();

        assert!(matches!(
            db.verify_credentials("a@example.com", "nope"),
            Err(StoreError::Unauthorized(_))
        ));
        assert!(matches!(
            db.verify_credentials("nobody@example.com", "hunter22"),
            Err(StoreError::Unauthorized(_))
        ));
    }

    #[test]
    fn email_is_unique_case_insensitively() {
        let db = Database::open_in_memory().unwrap();
        db.create_account("a@example.com", "hunter22", &json!({}))
            .unwrap();
        assert!(matches!(
            db.create_account("A@Example.com", "hunter22", &json!({})),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn salts_differ_between_accounts() {
        assert_ne!(hash_password(b"salt-a", "pw"), hash_password(b"salt-b", "pw"));
    }
}
