//! The feed service: newest-first pages of published documents and
//! attachments, with the links a syndication feed needs. Rendering the page
//! into a feed format is left to the caller.

use std::sync::Arc;

use diretto_store::Connection;
use serde::{Deserialize, Serialize};

use crate::api::paging::{date_cursor, window};
use crate::entry::{EntryKind, strip_prefix};
use crate::views::{ATTACHMENTS_BY_DATE, DOCUMENTS_BY_UPLOAD_DATE};
use crate::{ApiError, AttachmentSummary, Context, DocumentSummary};

/// One page of a feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPage<E> {
    /// Feed title
    pub title: String,
    /// The deployment's website
    pub website: String,
    /// Stable identifier of the feed
    pub id: String,
    /// Upload time of the newest entry on the page
    pub updated: Option<String>,
    /// URI of this page
    pub self_link: String,
    /// URI of the page with older entries
    pub next: Option<String>,
    /// URI of the page with newer entries
    pub previous: Option<String>,
    /// The entries, newest first
    pub entries: Vec<E>,
}

/// The feed service of a node.
pub struct FeedService<C: Connection> {
    context: Arc<Context<C>>,
}

impl<C: Connection> Clone for FeedService<C> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}

impl<C: Connection> FeedService<C> {
    /// Serve requests with `context`
    pub fn new(context: Arc<Context<C>>) -> Self {
        Self { context }
    }

    /// Published documents, starting at the document `cursor`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn documents(
        &self,
        cursor: Option<&str>,
    ) -> Result<FeedPage<DocumentSummary>, ApiError> {
        self.page(
            "documents",
            EntryKind::Document,
            DOCUMENTS_BY_UPLOAD_DATE,
            cursor,
            |entry: &DocumentSummary| entry.uploaded.clone(),
        )
        .await
    }

    /// Published attachments, starting at the attachment `cursor`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn attachments(
        &self,
        cursor: Option<&str>,
    ) -> Result<FeedPage<AttachmentSummary>, ApiError> {
        self.page(
            "attachments",
            EntryKind::Attachment,
            ATTACHMENTS_BY_DATE,
            cursor,
            |entry: &AttachmentSummary| entry.uploaded.clone(),
        )
        .await
    }

    async fn page<E, F>(
        &self,
        name: &str,
        kind: EntryKind,
        view: &'static str,
        cursor: Option<&str>,
        updated: F,
    ) -> Result<FeedPage<E>, ApiError>
    where
        E: serde::de::DeserializeOwned,
        F: Fn(&E) -> String,
    {
        let entries = self.context.entries()?;
        let start_key = match cursor {
            Some(id) => Some(date_cursor(&entries, kind, id).await?),
            None => None,
        };

        let page = window(
            entries,
            self.context.entries()?,
            view,
            start_key,
            self.context.config().feed.page_size,
            true,
        )
        .await?
        .into_page(|row| Some(strip_prefix(&row.id).to_string()));

        let feed = self
            .context
            .endpoints()
            .feed
            .join(name)
            .map_err(|error| ApiError::internal(error.to_string()))?;
        let link = |cursor: &str| format!("{feed}?cursor={cursor}");
        let deployment = &self.context.config().deployment;

        Ok(FeedPage {
            title: format!("{} {name}", deployment.title),
            website: deployment.website.clone(),
            id: feed.to_string(),
            updated: page.items.first().map(updated),
            self_link: cursor.map_or_else(|| feed.to_string(), link),
            next: page.next.as_deref().map(link),
            previous: page.previous.as_deref().map(link),
            entries: page.items,
        })
    }
}
