use std::sync::Arc;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::DirettoStoreError;

/// A stored record: a JSON object keyed by field name.
pub type Document = serde_json::Map<String, Value>;

/// Parameters for reading a view.
///
/// Rows are ordered by `(key, id)`, reversed when `descending` is set.
/// `start_key` is inclusive and is interpreted in the direction of
/// iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewQuery {
    /// Only return rows emitted under exactly this key
    pub key: Option<String>,
    /// Skip rows ordered before this key
    pub start_key: Option<String>,
    /// Return at most this many rows
    pub limit: Option<usize>,
    /// Iterate from the highest key down
    pub descending: bool,
}

impl ViewQuery {
    /// A query over every row of a view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the query to a single key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Start iteration at `start_key`.
    pub fn with_start_key(mut self, start_key: impl Into<String>) -> Self {
        self.start_key = Some(start_key.into());
        self
    }

    /// Return at most `limit` rows.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Iterate from the highest key down.
    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }
}

/// A single row emitted by a view.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRow {
    /// Identifier of the record that emitted the row
    pub id: String,
    /// The key the row was emitted under
    pub key: String,
    /// The emitted value
    pub value: Value,
}

/// The result of reading a view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewResult {
    /// The number of rows in the whole view, regardless of the query
    pub total_rows: usize,
    /// The rows selected by the query
    pub rows: Vec<ViewRow>,
}

/// A [DocumentStore] is the facade over the external document database that
/// holds every metadata record. Nothing else about the database leaks into
/// the rest of the system.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the record stored under `id`
    async fn get(&self, id: &str) -> Result<Document, DirettoStoreError>;

    /// Create a record under `id`, failing with
    /// [DirettoStoreError::Conflict] if one already exists
    async fn insert(&self, id: &str, document: Document) -> Result<(), DirettoStoreError>;

    /// Merge the top-level fields of `document` into the record stored under
    /// `id`, creating the record if there is none
    async fn save(&self, id: &str, document: Document) -> Result<(), DirettoStoreError>;

    /// Delete the record stored under `id`
    async fn remove(&self, id: &str) -> Result<(), DirettoStoreError>;

    /// Allocate `count` fresh, unique identifiers
    async fn uuids(&self, count: usize) -> Result<Vec<String>, DirettoStoreError>;

    /// Read the rows of the view called `name`
    async fn view(&self, name: &str, query: &ViewQuery) -> Result<ViewResult, DirettoStoreError>;
}

#[async_trait]
impl<T> DocumentStore for Arc<T>
where
    T: DocumentStore + ?Sized,
{
    async fn get(&self, id: &str) -> Result<Document, DirettoStoreError> {
        self.as_ref().get(id).await
    }

    async fn insert(&self, id: &str, document: Document) -> Result<(), DirettoStoreError> {
        self.as_ref().insert(id, document).await
    }

    async fn save(&self, id: &str, document: Document) -> Result<(), DirettoStoreError> {
        self.as_ref().save(id, document).await
    }

    async fn remove(&self, id: &str) -> Result<(), DirettoStoreError> {
        self.as_ref().remove(id).await
    }

    async fn uuids(&self, count: usize) -> Result<Vec<String>, DirettoStoreError> {
        self.as_ref().uuids(count).await
    }

    async fn view(&self, name: &str, query: &ViewQuery) -> Result<ViewResult, DirettoStoreError> {
        self.as_ref().view(name, query).await
    }
}

/// Convert a typed record into a [Document].
pub fn encode<T>(record: &T) -> Result<Document, DirettoStoreError>
where
    T: Serialize,
{
    match serde_json::to_value(record) {
        Ok(Value::Object(document)) => Ok(document),
        Ok(other) => Err(DirettoStoreError::Encoding(format!(
            "expected an object, found {other}"
        ))),
        Err(error) => Err(DirettoStoreError::Encoding(error.to_string())),
    }
}

/// Convert a [Document] into a typed record.
pub fn decode<T>(document: Document) -> Result<T, DirettoStoreError>
where
    T: DeserializeOwned,
{
    serde_json::from_value(Value::Object(document))
        .map_err(|error| DirettoStoreError::Encoding(error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Record {
        owner: String,
        published: bool,
    }

    #[test]
    fn it_encodes_and_decodes_typed_records() -> anyhow::Result<()> {
        let record = Record {
            owner: "alice".into(),
            published: false,
        };

        let document = encode(&record)?;
        assert_eq!(document.get("owner"), Some(&Value::from("alice")));
        assert_eq!(decode::<Record>(document)?, record);
        Ok(())
    }

    #[test]
    fn it_refuses_to_encode_non_objects() {
        assert!(matches!(
            encode(&42),
            Err(DirettoStoreError::Encoding(_))
        ));
    }
}
