use std::sync::Arc;
use std::time::Duration;

use diretto_credentials::{Authenticator, Principal, Signer};
use diretto_store::{Connection, ConnectionPool, Connector, PooledStore};
use tokio::task::JoinHandle;

use crate::{ApiError, Config, ConfigurationError, ENTRIES, Endpoints, USERS};

/// Everything a service needs, built once at process start and shared by
/// every request.
pub struct Context<C: Connection> {
    config: Config,
    endpoints: Endpoints,
    signer: Signer,
    pool: Arc<ConnectionPool<C>>,
    authenticator: Authenticator<PooledStore<C>>,
    sweeper: Option<JoinHandle<()>>,
}

impl<C: Connection> Context<C> {
    /// Validate `config` and open every pooled connection through
    /// `connector`.
    pub async fn open<K>(config: Config, connector: &K) -> Result<Arc<Self>, ConfigurationError>
    where
        K: Connector<Connection = C>,
    {
        let endpoints = config.validate()?;
        let signer = Signer::new(&config.security.key)
            .map_err(|error| ConfigurationError::Invalid(error.to_string()))?;

        let pool = Arc::new(
            ConnectionPool::open(
                connector,
                config
                    .pool
                    .0
                    .iter()
                    .map(|(alias, slot)| (alias.clone(), slot.clone())),
            )
            .await?,
        );

        let users = pool.store(USERS).ok_or_else(|| {
            ConfigurationError::Invalid(format!("pool.{USERS} is not configured"))
        })?;
        let authenticator = Authenticator::new(
            users,
            config.auth.cache_size,
            Duration::from_secs(config.auth.lease_secs),
        );
        let sweeper = (config.auth.sweep_secs > 0).then(|| {
            authenticator.spawn_sweeper(Duration::from_secs(config.auth.sweep_secs))
        });

        tracing::info!(
            api = %endpoints.api,
            media = %endpoints.media,
            feed = %endpoints.feed,
            "Opened node context"
        );

        Ok(Arc::new(Self {
            config,
            endpoints,
            signer,
            pool,
            authenticator,
            sweeper,
        }))
    }

    /// The configuration the context was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Parsed public base URIs
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// The capability token signer
    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// The connection pool
    pub fn pool(&self) -> &Arc<ConnectionPool<C>> {
        &self.pool
    }

    /// The credential checker
    pub fn authenticator(&self) -> &Authenticator<PooledStore<C>> {
        &self.authenticator
    }

    /// Resolve an `Authorization` header to a principal.
    pub async fn authenticate(&self, header: Option<&str>) -> Result<Principal, ApiError> {
        Ok(self.authenticator.authenticate(header).await?)
    }

    /// The next `entries` handle.
    pub(crate) fn entries(&self) -> Result<C::Database, ApiError> {
        self.handle(ENTRIES)
    }

    /// The next `users` handle.
    pub(crate) fn users(&self) -> Result<C::Database, ApiError> {
        self.handle(USERS)
    }

    /// The next raw `entries` connection, for identifier allocation.
    pub(crate) fn entries_connection(&self) -> Result<Arc<C>, ApiError> {
        self.pool
            .raw_handle(ENTRIES)
            .ok_or_else(|| ApiError::internal(format!("pool.{ENTRIES} is not configured")))
    }

    fn handle(&self, alias: &str) -> Result<C::Database, ApiError> {
        self.pool
            .handle(alias)
            .ok_or_else(|| ApiError::internal(format!("pool.{alias} is not configured")))
    }
}

impl<C: Connection> Drop for Context<C> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}
