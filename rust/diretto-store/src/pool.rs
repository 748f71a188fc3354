//! Round-robin pool of backend connections, keyed by logical alias.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{DirettoStoreError, Document, DocumentStore, ViewQuery, ViewResult};

/// An open connection to the document database.
///
/// A connection hands out table-bound database handles and also serves
/// auxiliary requests that are not bound to a table, such as identifier
/// allocation.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// The handle type bound to a single table
    type Database: DocumentStore + Clone + 'static;

    /// Bind a handle for `table` to this connection
    fn database(&self, table: &str) -> Self::Database;

    /// Allocate `count` fresh, unique identifiers
    async fn uuids(&self, count: usize) -> Result<Vec<String>, DirettoStoreError>;
}

/// Something that knows how to open [Connection]s.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The kind of connection this connector opens
    type Connection: Connection;

    /// Open a new connection
    async fn connect(&self) -> Result<Self::Connection, DirettoStoreError>;
}

/// Pool settings for a single alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConfig {
    /// The table every handle for the alias is bound to
    pub table: String,
    /// How many connections to open for the alias
    pub connections: usize,
}

impl SlotConfig {
    /// Settings for `connections` connections bound to `table`.
    pub fn new(table: impl Into<String>, connections: usize) -> Self {
        Self {
            table: table.into(),
            connections,
        }
    }
}

struct Slot<C: Connection> {
    table: String,
    connections: Vec<Arc<C>>,
    databases: Vec<C::Database>,
    cursor: AtomicUsize,
}

impl<C: Connection> Slot<C> {
    /// Move the cursor one step, returning the position it pointed at.
    fn advance(&self) -> usize {
        let size = self.connections.len();
        self.cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cursor| {
                Some((cursor + 1) % size)
            })
            .unwrap_or_else(|cursor| cursor)
    }
}

/// A fixed set of connections per alias, handed out in rotating order.
///
/// [ConnectionPool::handle] and [ConnectionPool::raw_handle] advance the same
/// cursor for an alias, so interleaving them still visits every connection
/// in turn. The pool never reconnects or skips a connection: a broken one
/// keeps being handed out on its turn.
pub struct ConnectionPool<C: Connection> {
    slots: HashMap<String, Slot<C>>,
}

impl<C: Connection> ConnectionPool<C> {
    /// Open every connection described by `slots`.
    pub async fn open<K, A>(
        connector: &K,
        slots: impl IntoIterator<Item = (A, SlotConfig)>,
    ) -> Result<Self, DirettoStoreError>
    where
        K: Connector<Connection = C>,
        A: Into<String>,
    {
        let mut pool = HashMap::new();

        for (alias, config) in slots {
            let alias = alias.into();
            if config.connections == 0 {
                return Err(DirettoStoreError::Configuration(format!(
                    "Alias {alias} needs at least one connection"
                )));
            }

            let mut connections = Vec::with_capacity(config.connections);
            let mut databases = Vec::with_capacity(config.connections);
            for _ in 0..config.connections {
                let connection = connector.connect().await?;
                databases.push(connection.database(&config.table));
                connections.push(Arc::new(connection));
            }

            tracing::debug!(
                alias = %alias,
                table = %config.table,
                connections = config.connections,
                "Opened pool slot"
            );

            pool.insert(
                alias,
                Slot {
                    table: config.table,
                    connections,
                    databases,
                    cursor: AtomicUsize::new(0),
                },
            );
        }

        Ok(Self { slots: pool })
    }

    /// The next table handle for `alias`, or `None` if the alias is unknown.
    pub fn handle(&self, alias: &str) -> Option<C::Database> {
        let slot = self.slots.get(alias)?;
        let position = slot.advance();
        slot.databases.get(position).cloned()
    }

    /// The next raw connection for `alias`, or `None` if the alias is
    /// unknown.
    pub fn raw_handle(&self, alias: &str) -> Option<Arc<C>> {
        let slot = self.slots.get(alias)?;
        let position = slot.advance();
        slot.connections.get(position).cloned()
    }

    /// The number of pooled connections for `alias`.
    pub fn size(&self, alias: &str) -> Option<usize> {
        self.slots.get(alias).map(|slot| slot.connections.len())
    }

    /// The table the handles for `alias` are bound to.
    pub fn table_name(&self, alias: &str) -> Option<&str> {
        self.slots.get(alias).map(|slot| slot.table.as_str())
    }

    /// All configured aliases.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// A [DocumentStore] that takes the next handle for `alias` on every
    /// call, or `None` if the alias is unknown.
    pub fn store(self: &Arc<Self>, alias: &str) -> Option<PooledStore<C>> {
        self.slots.contains_key(alias).then(|| PooledStore {
            pool: self.clone(),
            alias: alias.to_string(),
        })
    }
}

/// A [DocumentStore] spread over every pooled connection of one alias.
pub struct PooledStore<C: Connection> {
    pool: Arc<ConnectionPool<C>>,
    alias: String,
}

impl<C: Connection> Clone for PooledStore<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            alias: self.alias.clone(),
        }
    }
}

impl<C: Connection> PooledStore<C> {
    /// The alias every call is routed through
    pub fn alias(&self) -> &str {
        &self.alias
    }

    fn next(&self) -> Result<C::Database, DirettoStoreError> {
        self.pool.handle(&self.alias).ok_or_else(|| {
            DirettoStoreError::Configuration(format!("Alias {} is not pooled", self.alias))
        })
    }
}

#[async_trait]
impl<C: Connection> DocumentStore for PooledStore<C> {
    async fn get(&self, id: &str) -> Result<Document, DirettoStoreError> {
        self.next()?.get(id).await
    }

    async fn insert(&self, id: &str, document: Document) -> Result<(), DirettoStoreError> {
        self.next()?.insert(id, document).await
    }

    async fn save(&self, id: &str, document: Document) -> Result<(), DirettoStoreError> {
        self.next()?.save(id, document).await
    }

    async fn remove(&self, id: &str) -> Result<(), DirettoStoreError> {
        self.next()?.remove(id).await
    }

    async fn uuids(&self, count: usize) -> Result<Vec<String>, DirettoStoreError> {
        self.next()?.uuids(count).await
    }

    async fn view(&self, name: &str, query: &ViewQuery) -> Result<ViewResult, DirettoStoreError> {
        self.next()?.view(name, query).await
    }
}
