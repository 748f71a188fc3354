use diretto_credentials::Principal;
use diretto_store::{Connection, Document, DocumentStore, decode, encode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entry::{UserRecord, is_valid_id};
use crate::{ApiError, MetadataService};

/// A registration request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    /// Login name
    pub username: String,
    /// Contact address
    pub email: String,
    /// Login secret
    pub password: String,
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Fields of an account a user may change.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserChanges {
    /// New contact address
    pub email: Option<String>,
    /// New login secret
    pub password: Option<String>,
}

/// The public part of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Login name
    pub username: String,
    /// Contact address
    pub email: String,
}

impl From<UserRecord> for UserProfile {
    fn from(record: UserRecord) -> Self {
        Self {
            username: record.username,
            email: record.email,
        }
    }
}

fn check_email(email: &str) -> Result<(), ApiError> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(ApiError::validation("invalid email")),
    }
}

fn check_password(password: &str) -> Result<(), ApiError> {
    if password.is_empty() {
        Err(ApiError::validation("password must not be empty"))
    } else {
        Ok(())
    }
}

impl<C: Connection> MetadataService<C> {
    /// Register an account.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn create_user(&self, user: NewUser) -> Result<UserProfile, ApiError> {
        if !self.context.config().deployment.allow_new_users {
            return Err(ApiError::forbidden("registration is closed"));
        }
        if !is_valid_id(&user.username) {
            return Err(ApiError::validation("invalid username"));
        }
        check_email(&user.email)?;
        check_password(&user.password)?;

        let record = UserRecord {
            username: user.username,
            email: user.email,
            password: user.password,
        };
        self.context
            .users()?
            .insert(&record.username, encode(&record)?)
            .await?;

        tracing::info!(username = %record.username, "Registered user");
        Ok(record.into())
    }

    /// Read the public profile of an account.
    pub async fn get_user(&self, username: &str) -> Result<UserProfile, ApiError> {
        let record: UserRecord = decode(self.context.users()?.get(username).await?)?;
        Ok(record.into())
    }

    /// Change the principal's own account.
    #[tracing::instrument(level = "debug", skip(self, principal, changes), fields(principal = %principal))]
    pub async fn change_user(
        &self,
        principal: &Principal,
        username: &str,
        changes: UserChanges,
    ) -> Result<UserProfile, ApiError> {
        self.check_self(principal, username)?;

        let users = self.context.users()?;
        let mut record: UserRecord = decode(users.get(username).await?)?;

        let mut update = Document::new();
        if let Some(email) = changes.email {
            check_email(&email)?;
            update.insert("email".into(), Value::from(email.clone()));
            record.email = email;
        }
        if let Some(password) = changes.password {
            check_password(&password)?;
            update.insert("password".into(), Value::from(password.clone()));
            record.password = password;
        }

        if !update.is_empty() {
            users.save(username, update).await?;
            self.context.authenticator().forget(username);
        }
        Ok(record.into())
    }

    /// Delete the principal's own account.
    #[tracing::instrument(level = "debug", skip(self, principal), fields(principal = %principal))]
    pub async fn delete_user(&self, principal: &Principal, username: &str) -> Result<(), ApiError> {
        self.check_self(principal, username)?;
        self.context.users()?.remove(username).await?;
        self.context.authenticator().forget(username);
        tracing::info!(username, "Deleted user");
        Ok(())
    }

    fn check_self(&self, principal: &Principal, username: &str) -> Result<(), ApiError> {
        if principal.as_str() == username {
            Ok(())
        } else {
            Err(ApiError::forbidden("users may only change their own account"))
        }
    }
}
