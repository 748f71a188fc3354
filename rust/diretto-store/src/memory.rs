//! In-memory document store for testing and local development

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{
    Connection, Connector, DirettoStoreError, Document, DocumentStore, ViewQuery, ViewResult,
    ViewRow,
};

/// A map function backing a view: given a record's identifier and contents,
/// emit zero or more `(key, value)` rows.
pub type ViewMap = Arc<dyn Fn(&str, &Document) -> Vec<(String, Value)> + Send + Sync>;

type Tables = HashMap<String, BTreeMap<String, Document>>;

/// In-memory document store provider.
///
/// Every connection opened from the same provider shares one set of tables,
/// so records written through one pooled connection are visible through all
/// of the others.
///
/// # Examples
///
/// ```
/// use diretto_store::{Connection, Connector, DocumentStore, MemoryStoreProvider};
///
/// # async fn example() -> Result<(), diretto_store::DirettoStoreError> {
/// let provider = MemoryStoreProvider::new();
///
/// let first = provider.connect().await?.database("entries");
/// let second = provider.connect().await?.database("entries");
///
/// first.insert("d-1", serde_json::Map::new()).await?;
/// assert!(second.get("d-1").await.is_ok());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryStoreProvider {
    tables: Arc<RwLock<Tables>>,
    views: Arc<parking_lot::RwLock<HashMap<String, ViewMap>>>,
    broken: Arc<parking_lot::RwLock<HashSet<u64>>>,
    connections: Arc<AtomicU64>,
}

impl MemoryStoreProvider {
    /// Create a new provider with no tables and no views
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
            views: Arc::new(parking_lot::RwLock::new(HashMap::new())),
            broken: Arc::new(parking_lot::RwLock::new(HashSet::new())),
            connections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Define (or replace) the view called `name`
    pub fn define_view<F>(&self, name: impl Into<String>, map: F)
    where
        F: Fn(&str, &Document) -> Vec<(String, Value)> + Send + Sync + 'static,
    {
        self.views.write().insert(name.into(), Arc::new(map));
    }

    /// Make every subsequent call through connection `id` fail with
    /// [DirettoStoreError::Backend]
    pub fn break_connection(&self, id: u64) {
        self.broken.write().insert(id);
    }

    /// Undo [MemoryStoreProvider::break_connection]
    pub fn repair_connection(&self, id: u64) {
        self.broken.write().remove(&id);
    }

    /// The number of connections opened so far
    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self, id: u64) -> Result<(), DirettoStoreError> {
        if self.broken.read().contains(&id) {
            return Err(DirettoStoreError::Backend(format!(
                "Connection {id} is unavailable"
            )));
        }
        Ok(())
    }

    fn view_map(&self, name: &str) -> Result<ViewMap, DirettoStoreError> {
        self.views
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DirettoStoreError::UnknownView(name.to_string()))
    }
}

impl Default for MemoryStoreProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryStoreProvider {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<Self::Connection, DirettoStoreError> {
        let id = self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            id,
            provider: self.clone(),
        })
    }
}

/// A connection opened by a [MemoryStoreProvider].
#[derive(Clone)]
pub struct MemoryConnection {
    id: u64,
    provider: MemoryStoreProvider,
}

impl MemoryConnection {
    /// The provider-assigned identifier of this connection
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    type Database = MemoryDatabase;

    fn database(&self, table: &str) -> MemoryDatabase {
        MemoryDatabase {
            connection: self.id,
            table: table.to_string(),
            provider: self.provider.clone(),
        }
    }

    async fn uuids(&self, count: usize) -> Result<Vec<String>, DirettoStoreError> {
        self.provider.ensure_connected(self.id)?;
        Ok(allocate(count))
    }
}

/// A table handle bound to one [MemoryConnection].
#[derive(Clone)]
pub struct MemoryDatabase {
    connection: u64,
    table: String,
    provider: MemoryStoreProvider,
}

impl MemoryDatabase {
    /// The identifier of the connection this handle is bound to
    pub fn connection_id(&self) -> u64 {
        self.connection
    }

    /// The table this handle reads and writes
    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl DocumentStore for MemoryDatabase {
    async fn get(&self, id: &str) -> Result<Document, DirettoStoreError> {
        self.provider.ensure_connected(self.connection)?;
        let tables = self.provider.tables.read().await;
        tables
            .get(&self.table)
            .and_then(|table| table.get(id))
            .cloned()
            .ok_or_else(|| DirettoStoreError::NotFound(id.to_string()))
    }

    async fn insert(&self, id: &str, document: Document) -> Result<(), DirettoStoreError> {
        self.provider.ensure_connected(self.connection)?;
        let mut tables = self.provider.tables.write().await;
        let table = tables.entry(self.table.clone()).or_default();
        if table.contains_key(id) {
            return Err(DirettoStoreError::Conflict(id.to_string()));
        }
        table.insert(id.to_string(), document);
        Ok(())
    }

    async fn save(&self, id: &str, document: Document) -> Result<(), DirettoStoreError> {
        self.provider.ensure_connected(self.connection)?;
        let mut tables = self.provider.tables.write().await;
        let stored = tables
            .entry(self.table.clone())
            .or_default()
            .entry(id.to_string())
            .or_default();
        stored.extend(document);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), DirettoStoreError> {
        self.provider.ensure_connected(self.connection)?;
        let mut tables = self.provider.tables.write().await;
        tables
            .get_mut(&self.table)
            .and_then(|table| table.remove(id))
            .map(|_| ())
            .ok_or_else(|| DirettoStoreError::NotFound(id.to_string()))
    }

    async fn uuids(&self, count: usize) -> Result<Vec<String>, DirettoStoreError> {
        self.provider.ensure_connected(self.connection)?;
        Ok(allocate(count))
    }

    async fn view(&self, name: &str, query: &ViewQuery) -> Result<ViewResult, DirettoStoreError> {
        self.provider.ensure_connected(self.connection)?;
        let map = self.provider.view_map(name)?;

        let mut rows = {
            let tables = self.provider.tables.read().await;
            let mut rows = Vec::new();
            if let Some(table) = tables.get(&self.table) {
                for (id, document) in table {
                    for (key, value) in map(id, document) {
                        rows.push(ViewRow {
                            id: id.clone(),
                            key,
                            value,
                        });
                    }
                }
            }
            rows
        };

        rows.sort_by(|left, right| (&left.key, &left.id).cmp(&(&right.key, &right.id)));
        if query.descending {
            rows.reverse();
        }

        let total_rows = rows.len();
        let selected = rows
            .into_iter()
            .filter(|row| query.key.as_ref().is_none_or(|key| &row.key == key))
            .filter(|row| match &query.start_key {
                Some(start) if query.descending => &row.key <= start,
                Some(start) => &row.key >= start,
                None => true,
            })
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(ViewResult {
            total_rows,
            rows: selected,
        })
    }
}

fn allocate(count: usize) -> Vec<String> {
    (0..count)
        .map(|_| hex::encode(rand::random::<[u8; 16]>()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;

    fn record(value: Value) -> Document {
        match value {
            Value::Object(document) => document,
            _ => Document::new(),
        }
    }

    async fn entries(provider: &MemoryStoreProvider) -> Result<MemoryDatabase> {
        Ok(provider.connect().await?.database("entries"))
    }

    #[tokio::test]
    async fn it_inserts_and_reads_back_a_record() -> Result<()> {
        let provider = MemoryStoreProvider::new();
        let db = entries(&provider).await?;

        db.insert("d-1", record(json!({ "owner": "alice" }))).await?;

        assert_eq!(db.get("d-1").await?.get("owner"), Some(&json!("alice")));
        Ok(())
    }

    #[tokio::test]
    async fn it_reports_conflicts_on_insert() -> Result<()> {
        let provider = MemoryStoreProvider::new();
        let db = entries(&provider).await?;

        db.insert("d-1", Document::new()).await?;
        let result = db.insert("d-1", Document::new()).await;

        assert_eq!(result, Err(DirettoStoreError::Conflict("d-1".into())));
        Ok(())
    }

    #[tokio::test]
    async fn it_merges_fields_on_save() -> Result<()> {
        let provider = MemoryStoreProvider::new();
        let db = entries(&provider).await?;

        db.insert("a-1", record(json!({ "mime": "image/png", "size": 10 })))
            .await?;
        db.save("a-1", record(json!({ "location": "/d/a.png" })))
            .await?;

        let stored = db.get("a-1").await?;
        assert_eq!(stored.get("mime"), Some(&json!("image/png")));
        assert_eq!(stored.get("location"), Some(&json!("/d/a.png")));
        Ok(())
    }

    #[tokio::test]
    async fn it_removes_records() -> Result<()> {
        let provider = MemoryStoreProvider::new();
        let db = entries(&provider).await?;

        db.insert("v-1", Document::new()).await?;
        db.remove("v-1").await?;

        assert!(matches!(db.get("v-1").await, Err(DirettoStoreError::NotFound(_))));
        assert!(matches!(db.remove("v-1").await, Err(DirettoStoreError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn it_keeps_tables_apart() -> Result<()> {
        let provider = MemoryStoreProvider::new();
        let connection = provider.connect().await?;

        connection.database("users").insert("alice", Document::new()).await?;

        assert!(connection.database("entries").get("alice").await.is_err());
        assert!(connection.database("users").get("alice").await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn it_allocates_unique_identifiers() -> Result<()> {
        let provider = MemoryStoreProvider::new();
        let ids = provider.connect().await?.uuids(8).await?;

        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 8);
        assert!(ids.iter().all(|id| id.len() == 32));
        Ok(())
    }

    #[tokio::test]
    async fn it_reads_views_in_key_order() -> Result<()> {
        let provider = MemoryStoreProvider::new();
        provider.define_view("by_time", |id, document| {
            match document.get("time").and_then(Value::as_str) {
                Some(time) => vec![(time.to_string(), json!(id))],
                None => vec![],
            }
        });
        let db = entries(&provider).await?;

        db.insert("d-b", record(json!({ "time": "2" }))).await?;
        db.insert("d-a", record(json!({ "time": "1" }))).await?;
        db.insert("d-c", record(json!({ "time": "3" }))).await?;
        db.insert("s-a", Document::new()).await?;

        let all = db.view("by_time", &ViewQuery::new()).await?;
        let ids: Vec<_> = all.rows.iter().map(|row| row.id.as_str()).collect();
        assert_eq!(ids, vec!["d-a", "d-b", "d-c"]);
        assert_eq!(all.total_rows, 3);

        let page = db
            .view("by_time", &ViewQuery::new().descending().with_start_key("2").with_limit(5))
            .await?;
        let ids: Vec<_> = page.rows.iter().map(|row| row.id.as_str()).collect();
        assert_eq!(ids, vec!["d-b", "d-a"]);

        let single = db.view("by_time", &ViewQuery::new().with_key("3")).await?;
        assert_eq!(single.rows.len(), 1);
        assert_eq!(single.rows[0].id, "d-c");
        Ok(())
    }

    #[tokio::test]
    async fn it_rejects_unknown_views() -> Result<()> {
        let provider = MemoryStoreProvider::new();
        let db = entries(&provider).await?;

        assert_eq!(
            db.view("missing", &ViewQuery::new()).await,
            Err(DirettoStoreError::UnknownView("missing".into()))
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_fails_every_call_on_a_broken_connection() -> Result<()> {
        let provider = MemoryStoreProvider::new();
        let healthy = entries(&provider).await?;
        let broken = entries(&provider).await?;
        provider.break_connection(broken.connection_id());

        assert!(matches!(
            broken.insert("d-1", Document::new()).await,
            Err(DirettoStoreError::Backend(_))
        ));
        healthy.insert("d-1", Document::new()).await?;

        provider.repair_connection(broken.connection_id());
        assert!(broken.get("d-1").await.is_ok());
        Ok(())
    }
}
