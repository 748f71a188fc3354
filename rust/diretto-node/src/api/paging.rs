use chrono::{DateTime, Utc};
use diretto_common::JoinBarrier;
use diretto_store::{Connection, DocumentStore, ViewQuery, ViewRow, decode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::entry::{EntryKind, check_id, strip_prefix};
use crate::error::joined;
use crate::views::{ATTACHMENTS_BY_DATE, DOCUMENTS_BY_UPLOAD_DATE, USERS_BY_ID, date_key};
use crate::{ApiError, MetadataService};

/// Direction of a listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    /// Oldest first
    #[default]
    Ascending,
    /// Newest first
    Descending,
}

impl Order {
    pub(crate) fn is_descending(&self) -> bool {
        matches!(self, Order::Descending)
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// The rows of this page
    pub items: Vec<T>,
    /// Cursor of the first row of the following page
    pub next: Option<String>,
    /// Cursor of the first row of the preceding page
    pub previous: Option<String>,
    /// Rows in the whole listing
    pub total: usize,
}

/// A published document as it appears in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    /// Document identifier
    pub id: String,
    /// Media kind of the primary attachment
    pub mediatype: String,
    /// The principal that created the document
    pub owner: String,
    /// Creation time
    pub uploaded: String,
}

/// A published attachment as it appears in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentSummary {
    /// Attachment identifier
    pub id: String,
    /// The owning document
    pub doc_id: String,
    /// Declared MIME type
    pub mime: String,
    /// Declared length in bytes
    pub size: u64,
    /// Public URI of the stored bytes
    pub location: Option<String>,
    /// The principal that uploaded it
    pub uploader: String,
    /// Creation time
    pub uploaded: String,
}

impl<C: Connection> MetadataService<C> {
    /// List usernames in order, starting at `cursor`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list_users(&self, cursor: Option<&str>) -> Result<Page<String>, ApiError> {
        let page_size = self.context.config().api.page_size;
        let window = window(
            self.context.users()?,
            self.context.users()?,
            USERS_BY_ID,
            cursor.map(str::to_string),
            page_size,
            false,
        )
        .await?;
        Ok(window.into_page(|row| Some(row.key.clone())))
    }

    /// List published documents by upload time, starting at the document
    /// `cursor`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list_documents(
        &self,
        order: Order,
        cursor: Option<&str>,
    ) -> Result<Page<DocumentSummary>, ApiError> {
        let entries = self.context.entries()?;
        let start_key = match cursor {
            Some(id) => Some(date_cursor(&entries, EntryKind::Document, id).await?),
            None => None,
        };

        let window = window(
            entries,
            self.context.entries()?,
            DOCUMENTS_BY_UPLOAD_DATE,
            start_key,
            self.context.config().api.page_size,
            order.is_descending(),
        )
        .await?;
        Ok(window.into_page(|row| Some(strip_prefix(&row.id).to_string())))
    }

    /// List published attachments by upload time, starting at the
    /// attachment `cursor`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list_attachments(
        &self,
        order: Order,
        cursor: Option<&str>,
    ) -> Result<Page<AttachmentSummary>, ApiError> {
        let entries = self.context.entries()?;
        let start_key = match cursor {
            Some(id) => Some(date_cursor(&entries, EntryKind::Attachment, id).await?),
            None => None,
        };

        let window = window(
            entries,
            self.context.entries()?,
            ATTACHMENTS_BY_DATE,
            start_key,
            self.context.config().api.page_size,
            order.is_descending(),
        )
        .await?;
        Ok(window.into_page(|row| Some(strip_prefix(&row.id).to_string())))
    }
}

/// The key a date-ordered listing starts at when its cursor names the
/// record `id` of `kind`.
pub(crate) async fn date_cursor<S: DocumentStore>(
    entries: &S,
    kind: EntryKind,
    id: &str,
) -> Result<String, ApiError> {
    #[derive(Deserialize)]
    struct Uploaded {
        uploaded: DateTime<Utc>,
    }

    check_id("cursor", id)?;
    let key = kind.key(id);
    let record: Uploaded = decode(entries.get(&key).await?)?;
    Ok(date_key(&record.uploaded, &key))
}

/// Rows of a view around a cursor.
pub(crate) struct Window {
    pub rows: Vec<ViewRow>,
    pub next: Option<ViewRow>,
    pub previous: Option<ViewRow>,
    pub total: usize,
}

impl Window {
    /// Decode the row values into a page, naming neighbours with `cursor`.
    /// Rows whose value does not decode as `T` are skipped.
    pub fn into_page<T, F>(self, cursor: F) -> Page<T>
    where
        F: Fn(&ViewRow) -> Option<String>,
        T: DeserializeOwned,
    {
        Page {
            items: self
                .rows
                .into_iter()
                .filter_map(|row| serde_json::from_value(row.value).ok())
                .collect(),
            next: self.next.as_ref().and_then(&cursor),
            previous: self.previous.as_ref().and_then(&cursor),
            total: self.total,
        }
    }
}

/// Read `page_size` rows of `view` starting at `start_key`, plus the row
/// that starts the next page.
///
/// With a start key, a second query walks the view backwards from the same
/// key to find where the previous page starts. Both queries run on their
/// own handles under one barrier.
pub(crate) async fn window<S>(
    forward: S,
    backward: S,
    view: &'static str,
    start_key: Option<String>,
    page_size: usize,
    descending: bool,
) -> Result<Window, ApiError>
where
    S: DocumentStore + 'static,
{
    let parties = if start_key.is_some() { 2 } else { 1 };
    let (joiner, settlement) =
        JoinBarrier::settle(parties, || ApiError::internal("Listing failed"));

    let mut query = ViewQuery::new().with_limit(page_size + 1);
    if descending {
        query = query.descending();
    }
    if let Some(start_key) = &start_key {
        query = query.with_start_key(start_key.clone());
    }

    let forward = joiner.spawn(async move {
        Ok::<_, ApiError>(forward.view(view, &query).await?)
    });

    let backward = start_key.map(|start_key| {
        let mut query = ViewQuery::new()
            .with_limit(page_size + 1)
            .with_start_key(start_key);
        if !descending {
            query = query.descending();
        }
        joiner.spawn(async move { Ok::<_, ApiError>(backward.view(view, &query).await?) })
    });

    drop(joiner);
    settlement.wait().await?;

    let mut result = joined(forward).await?;
    let next = if result.rows.len() > page_size {
        result.rows.pop()
    } else {
        None
    };

    let previous = match backward {
        Some(backward) => {
            let mut result = joined(backward).await?;
            if result.rows.len() > 1 {
                result.rows.pop()
            } else {
                None
            }
        }
        None => None,
    };

    Ok(Window {
        rows: result.rows,
        next,
        previous,
        total: result.total_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use diretto_store::{Connection, Connector, MemoryDatabase, MemoryStoreProvider};
    use serde_json::json;

    async fn numbers(count: usize) -> Result<(MemoryStoreProvider, MemoryDatabase)> {
        let provider = MemoryStoreProvider::new();
        provider.define_view("numbers", |id, _| vec![(id.to_string(), json!(id))]);
        let db = provider.connect().await?.database("entries");
        for index in 0..count {
            db.insert(&format!("n{index:02}"), Default::default()).await?;
        }
        Ok((provider, db))
    }

    fn ids(rows: &[ViewRow]) -> Vec<&str> {
        rows.iter().map(|row| row.id.as_str()).collect()
    }

    #[tokio::test]
    async fn it_reads_the_first_page_without_a_previous_cursor() -> Result<()> {
        let (_provider, db) = numbers(5).await?;

        let window = super::window(db.clone(), db, "numbers", None, 2, false).await?;

        assert_eq!(ids(&window.rows), vec!["n00", "n01"]);
        assert_eq!(window.next.map(|row| row.id), Some("n02".to_string()));
        assert!(window.previous.is_none());
        assert_eq!(window.total, 5);
        Ok(())
    }

    #[tokio::test]
    async fn it_finds_the_previous_page_from_a_cursor() -> Result<()> {
        let (_provider, db) = numbers(7).await?;

        let window =
            super::window(db.clone(), db, "numbers", Some("n04".into()), 2, false).await?;

        assert_eq!(ids(&window.rows), vec!["n04", "n05"]);
        assert_eq!(window.next.map(|row| row.id), Some("n06".to_string()));
        assert_eq!(window.previous.map(|row| row.id), Some("n02".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn it_pages_backwards_when_descending() -> Result<()> {
        let (_provider, db) = numbers(7).await?;

        let window =
            super::window(db.clone(), db, "numbers", Some("n04".into()), 2, true).await?;

        assert_eq!(ids(&window.rows), vec!["n04", "n03"]);
        assert_eq!(window.next.map(|row| row.id), Some("n02".to_string()));
        assert_eq!(window.previous.map(|row| row.id), Some("n06".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn it_fails_when_either_query_fails() -> Result<()> {
        let (provider, db) = numbers(3).await?;
        let broken = provider.connect().await?.database("entries");
        provider.break_connection(broken.connection_id());

        let result = super::window(db, broken, "numbers", Some("n01".into()), 2, false).await;

        assert!(matches!(result, Err(ApiError::Internal(_))));
        Ok(())
    }
}
