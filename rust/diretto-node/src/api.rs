//! The metadata service.
//!
//! Operations take an already authenticated [Principal] where they need one;
//! [MetadataService::authenticate] resolves it from the request's
//! `Authorization` header. Every operation that waits on more than one
//! independent backend call fans them out under a [JoinBarrier], so the
//! first failure decides the outcome and late results are discarded.
//!
//! [JoinBarrier]: diretto_common::JoinBarrier

use std::future::Future;
use std::sync::Arc;

use diretto_common::JoinBarrier;
use diretto_credentials::Principal;
use diretto_store::{Connection, Document, DocumentStore, ViewQuery, ViewRow};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::entry::{AttachmentRecord, Entry, EntryKind, to_uuid};
use crate::error::joined;
use crate::{ApiError, Context};

mod annotations;
pub use annotations::*;

mod comments;
pub use comments::*;

mod documents;
pub use documents::*;

mod handoff;
pub use handoff::*;

pub(crate) mod paging;
pub use paging::{AttachmentSummary, DocumentSummary, Order, Page};

mod tags;
pub use tags::*;

mod users;
pub use users::*;

mod votes;
pub use votes::*;

/// The metadata service of a node.
pub struct MetadataService<C: Connection> {
    context: Arc<Context<C>>,
}

impl<C: Connection> Clone for MetadataService<C> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}

/// The first rows of an unpaged listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing<T> {
    /// At most a page of rows
    pub items: Vec<T>,
    /// Rows in the whole listing
    pub total: usize,
}

/// Static description of the deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// API version
    pub version: String,
    /// Deployment title
    pub title: String,
    /// Operator contact
    pub contact: String,
    /// Deployment website
    pub website: String,
    /// Metadata service base URI
    pub api_uri: String,
    /// Storage service base URI
    pub media_uri: String,
}

impl<C: Connection> MetadataService<C> {
    /// Serve requests with `context`
    pub fn new(context: Arc<Context<C>>) -> Self {
        Self { context }
    }

    /// The shared context
    pub fn context(&self) -> &Arc<Context<C>> {
        &self.context
    }

    /// Resolve an `Authorization` header to a principal.
    pub async fn authenticate(&self, header: Option<&str>) -> Result<Principal, ApiError> {
        self.context.authenticate(header).await
    }

    /// Describe this deployment.
    pub fn service_info(&self) -> ServiceInfo {
        let config = self.context.config();
        let endpoints = self.context.endpoints();
        ServiceInfo {
            version: "v1".into(),
            title: config.deployment.title.clone(),
            contact: config.deployment.contact.clone(),
            website: config.deployment.website.clone(),
            api_uri: endpoints.api.to_string(),
            media_uri: endpoints.media.to_string(),
        }
    }

    /// Allocate a fresh identifier through the next raw `entries`
    /// connection.
    fn allocate_id(&self) -> impl Future<Output = Result<String, ApiError>> + Send + 'static {
        let connection = self.context.entries_connection();
        async move {
            let mut ids = connection?.uuids(1).await?;
            ids.pop()
                .map(|raw| to_uuid(&raw))
                .ok_or_else(|| ApiError::internal("No identifier was allocated"))
        }
    }

    /// Fetch the record stored under `key` through the next `entries`
    /// handle.
    fn fetch(&self, key: String) -> impl Future<Output = Result<Document, ApiError>> + Send + 'static {
        let entries = self.context.entries();
        async move { Ok(entries?.get(&key).await?) }
    }

    /// Insert a new record under `key` through the next `entries` handle.
    async fn insert_entry<E: Entry>(&self, key: String, record: &E) -> Result<(), ApiError> {
        let document = record.to_document()?;
        Ok(self.context.entries()?.insert(&key, document).await?)
    }

    /// Read the rows `view` emitted under exactly `key` through the next
    /// `entries` handle.
    fn rows_under(
        &self,
        view: &'static str,
        key: String,
    ) -> impl Future<Output = Result<Vec<ViewRow>, ApiError>> + Send + 'static {
        let entries = self.context.entries();
        async move {
            let result = entries?.view(view, &ViewQuery::new().with_key(key)).await?;
            Ok(result.rows)
        }
    }

    /// Check that the document and its attachment both exist, fetching them
    /// under one barrier.
    async fn check_attachment(&self, doc_id: &str, attach_id: &str) -> Result<(), ApiError> {
        let (joiner, settlement) =
            JoinBarrier::settle(2, || ApiError::internal("Attachment lookup failed"));
        let _document = joiner.spawn(self.fetch(EntryKind::Document.key(doc_id)));
        let attachment = joiner.spawn(self.fetch(EntryKind::Attachment.key(attach_id)));
        drop(joiner);
        settlement.wait().await?;

        let attachment = AttachmentRecord::from_document(joined(attachment).await?)?;
        if attachment.doc_id != doc_id {
            return Err(ApiError::NotFound(EntryKind::Attachment.key(attach_id)));
        }
        Ok(())
    }
}

/// Decode the record a view emitted as its row value.
fn record_of<T: DeserializeOwned>(row: ViewRow) -> Result<T, ApiError> {
    serde_json::from_value(row.value)
        .map_err(|error| ApiError::internal(format!("Malformed row for {}: {error}", row.id)))
}
