use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use diretto_common::LeaseCache;
use diretto_store::{DirettoStoreError, DocumentStore};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tokio::task::JoinHandle;

use crate::{AuthenticationError, BasicCredentials};

/// Default number of cached credentials
pub const AUTH_CACHE_SIZE: usize = 1000;

/// Default lease of a cached credential
pub const AUTH_CACHE_LEASE: Duration = Duration::from_secs(120);

/// The authenticated identity a request or token is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    /// Wrap a username
    pub fn new(username: impl Into<String>) -> Self {
        Self(username.into())
    }

    /// The username
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Principal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Principal {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, PartialEq, Eq)]
struct CachedCredentials {
    password: String,
}

/// Resolves Basic credentials to a [Principal].
///
/// User records are looked up by username in the store handed to
/// [Authenticator::new] and must carry a `password` field. Successful
/// lookups are cached for the lease; a cache hit whose password does not
/// match goes back to the store rather than failing, so a changed password
/// is picked up right away. A revoked user keeps authenticating until their
/// lease runs out.
pub struct Authenticator<S> {
    users: S,
    cache: Arc<LeaseCache<String, CachedCredentials>>,
}

impl<S> Authenticator<S>
where
    S: DocumentStore,
{
    /// Authenticate against `users`, caching up to `capacity` credentials
    /// for `lease` each.
    pub fn new(users: S, capacity: usize, lease: Duration) -> Self {
        Self {
            users,
            cache: Arc::new(LeaseCache::new(capacity, lease)),
        }
    }

    /// Authenticate against `users` with [AUTH_CACHE_SIZE] and
    /// [AUTH_CACHE_LEASE].
    pub fn with_defaults(users: S) -> Self {
        Self::new(users, AUTH_CACHE_SIZE, AUTH_CACHE_LEASE)
    }

    /// Resolve the value of an `Authorization` header.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn authenticate(
        &self,
        header: Option<&str>,
    ) -> Result<Principal, AuthenticationError> {
        let header = header.ok_or(AuthenticationError::Missing)?;
        let credentials = BasicCredentials::parse(header).ok_or(AuthenticationError::Malformed)?;
        self.check(&credentials).await
    }

    /// Resolve already decoded credentials.
    pub async fn check(
        &self,
        credentials: &BasicCredentials,
    ) -> Result<Principal, AuthenticationError> {
        if let Some(cached) = self.cache.get(&credentials.username) {
            if passwords_match(&cached.password, &credentials.password) {
                tracing::debug!(username = %credentials.username, "Credential cache hit");
                return Ok(Principal::new(&credentials.username));
            }
            tracing::debug!(username = %credentials.username, "Cached credential mismatch");
        }

        self.fetch(credentials).await
    }

    /// Drop any cached credential for `username`.
    pub fn forget(&self, username: &str) {
        self.cache.remove(&username.to_string());
    }

    /// The number of credentials currently cached.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Periodically drop expired credentials until this authenticator is
    /// dropped.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        self.cache.spawn_sweeper(period)
    }

    async fn fetch(
        &self,
        credentials: &BasicCredentials,
    ) -> Result<Principal, AuthenticationError> {
        let record = match self.users.get(&credentials.username).await {
            Ok(record) => record,
            Err(DirettoStoreError::NotFound(_)) => return Err(AuthenticationError::Rejected),
            Err(error) => {
                tracing::warn!(%error, "Credential lookup failed");
                return Err(AuthenticationError::Unavailable(error.to_string()));
            }
        };

        let stored = record.get("password").and_then(|password| password.as_str());
        match stored {
            Some(password) if passwords_match(password, &credentials.password) => {
                self.cache.put(
                    credentials.username.clone(),
                    CachedCredentials {
                        password: password.to_string(),
                    },
                );
                Ok(Principal::new(&credentials.username))
            }
            _ => Err(AuthenticationError::Rejected),
        }
    }
}

fn passwords_match(stored: &str, presented: &str) -> bool {
    stored.as_bytes().ct_eq(presented.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use diretto_store::{Connection, Connector, MemoryDatabase, MemoryStoreProvider};
    use serde_json::json;

    const ALICE: &str = "Basic YWxpY2U6d29uZGVybGFuZA==";

    async fn users(provider: &MemoryStoreProvider) -> Result<MemoryDatabase> {
        let users = provider.connect().await?.database("users");
        let record = json!({ "password": "wonderland", "email": "alice@example.org" });
        if let serde_json::Value::Object(record) = record {
            users.insert("alice", record).await?;
        }
        Ok(users)
    }

    fn header(username: &str, password: &str) -> String {
        BasicCredentials {
            username: username.into(),
            password: password.into(),
        }
        .to_header()
    }

    #[tokio::test]
    async fn it_authenticates_valid_credentials() -> Result<()> {
        let provider = MemoryStoreProvider::new();
        let auth = Authenticator::with_defaults(users(&provider).await?);

        assert_eq!(auth.authenticate(Some(ALICE)).await?, Principal::new("alice"));
        assert_eq!(auth.cached(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn it_distinguishes_missing_malformed_and_rejected() -> Result<()> {
        let provider = MemoryStoreProvider::new();
        let auth = Authenticator::with_defaults(users(&provider).await?);

        assert_eq!(auth.authenticate(None).await, Err(AuthenticationError::Missing));
        assert_eq!(
            auth.authenticate(Some("Digest abc")).await,
            Err(AuthenticationError::Malformed)
        );
        assert_eq!(
            auth.authenticate(Some(&header("alice", "guess"))).await,
            Err(AuthenticationError::Rejected)
        );
        assert_eq!(
            auth.authenticate(Some(&header("mallory", "x"))).await,
            Err(AuthenticationError::Rejected)
        );
        assert_eq!(auth.cached(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn it_serves_cache_hits_without_the_store() -> Result<()> {
        let provider = MemoryStoreProvider::new();
        let users = users(&provider).await?;
        let auth = Authenticator::with_defaults(users.clone());

        auth.authenticate(Some(ALICE)).await?;
        provider.break_connection(users.connection_id());

        assert_eq!(auth.authenticate(Some(ALICE)).await?, Principal::new("alice"));
        Ok(())
    }

    #[tokio::test]
    async fn it_refetches_when_the_cached_password_differs() -> Result<()> {
        let provider = MemoryStoreProvider::new();
        let users = users(&provider).await?;
        let auth = Authenticator::with_defaults(users.clone());

        auth.authenticate(Some(ALICE)).await?;
        if let serde_json::Value::Object(change) = json!({ "password": "looking-glass" }) {
            users.save("alice", change).await?;
        }

        assert_eq!(
            auth.authenticate(Some(&header("alice", "looking-glass"))).await?,
            Principal::new("alice")
        );
        assert_eq!(
            auth.authenticate(Some(&header("alice", "wonderland"))).await,
            Err(AuthenticationError::Rejected)
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn it_goes_back_to_the_store_once_the_lease_expires() -> Result<()> {
        let provider = MemoryStoreProvider::new();
        let users = users(&provider).await?;
        let auth = Authenticator::new(users.clone(), 10, Duration::from_secs(120));

        auth.authenticate(Some(ALICE)).await?;
        users.remove("alice").await?;

        tokio::time::advance(Duration::from_secs(119)).await;
        assert!(auth.authenticate(Some(ALICE)).await.is_ok());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(
            auth.authenticate(Some(ALICE)).await,
            Err(AuthenticationError::Rejected)
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_reports_an_unavailable_store() -> Result<()> {
        let provider = MemoryStoreProvider::new();
        let users = users(&provider).await?;
        provider.break_connection(users.connection_id());
        let auth = Authenticator::with_defaults(users);

        assert!(matches!(
            auth.authenticate(Some(ALICE)).await,
            Err(AuthenticationError::Unavailable(_))
        ));
        Ok(())
    }

    #[test]
    fn it_compares_passwords_in_full() {
        assert!(passwords_match("wonderland", "wonderland"));
        assert!(!passwords_match("wonderland", "wonderlanD"));
        assert!(!passwords_match("wonderland", "wonder"));
        assert!(!passwords_match("wonderland", ""));
    }

    #[tokio::test]
    async fn it_forgets_cached_credentials() -> Result<()> {
        let provider = MemoryStoreProvider::new();
        let users = users(&provider).await?;
        let auth = Authenticator::with_defaults(users.clone());

        auth.authenticate(Some(ALICE)).await?;
        auth.forget("alice");
        users.remove("alice").await?;

        assert_eq!(
            auth.authenticate(Some(ALICE)).await,
            Err(AuthenticationError::Rejected)
        );
        Ok(())
    }
}
