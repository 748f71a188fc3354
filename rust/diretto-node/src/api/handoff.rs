use chrono::Utc;
use diretto_common::JoinBarrier;
use diretto_credentials::Principal;
use diretto_store::{Connection, Document, DocumentStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::entry::{AttachmentRecord, Entry, EntryKind, check_id, strip_prefix};
use crate::views::ATTACHMENTS_BY_DOCUMENT;
use crate::error::joined;
use crate::{ApiError, MediaType, MetadataService};

/// The status the storage service answers an accepted upload with. Publish
/// tokens are signed over it.
pub const UPLOAD_ACCEPTED: u16 = 201;

/// Declared properties of an attachment about to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentSpec {
    /// MIME type of the bytes
    pub content_type: String,
    /// Length of the bytes
    pub content_length: u64,
}

/// What a client needs to upload an attachment to the storage service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTicket {
    /// The upload token
    pub key: String,
    /// Where the bytes will live
    pub location: String,
    /// `location` with the token as its `key` query parameter
    pub uri: String,
}

/// An attachment record together with its identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentView {
    /// Attachment identifier
    pub id: String,
    /// The stored record
    #[serde(flatten)]
    pub record: AttachmentRecord,
}

impl<C: Connection> MetadataService<C> {
    /// Register a further attachment on an existing document and mint its
    /// upload ticket.
    #[tracing::instrument(level = "debug", skip(self, principal, spec), fields(principal = %principal))]
    pub async fn create_attachment(
        &self,
        principal: &Principal,
        doc_id: &str,
        spec: AttachmentSpec,
    ) -> Result<UploadTicket, ApiError> {
        check_id("document id", doc_id)?;
        let media_type = self.media_type(&spec)?;

        let (joiner, settlement) =
            JoinBarrier::settle(2, || ApiError::internal("Attachment creation failed"));
        let attach_id = joiner.spawn(self.allocate_id());
        let document = joiner.spawn(self.fetch(EntryKind::Document.key(doc_id)));
        drop(joiner);
        settlement.wait().await?;

        let attach_id = joined(attach_id).await?;
        joined(document).await?;

        self.upload_ticket(principal, doc_id, &attach_id, &spec, media_type)
            .await
    }

    /// Make an uploaded attachment authoritative.
    ///
    /// `token` is the publish token the storage service answered the upload
    /// with. It is recomputed from the stored record and the presenting
    /// principal, so only the uploader holding the genuine token succeeds.
    /// Publishing the primary attachment also publishes its document. The
    /// two writes are not atomic.
    #[tracing::instrument(level = "debug", skip(self, principal, token), fields(principal = %principal))]
    pub async fn publish_attachment(
        &self,
        principal: &Principal,
        doc_id: &str,
        attach_id: &str,
        token: &str,
    ) -> Result<AttachmentView, ApiError> {
        let key = EntryKind::Attachment.key(attach_id);
        let mut record = self.attachment_of(doc_id, attach_id).await?;

        if record.uploader != principal.as_str() {
            return Err(ApiError::forbidden("only the uploader may publish"));
        }

        let path = format!("/{}", record.path);
        if !self
            .context
            .signer()
            .verify_publish(token, UPLOAD_ACCEPTED, principal.as_str(), &path)
        {
            tracing::debug!(%path, "Rejected publish token");
            return Err(ApiError::forbidden("publish token does not match"));
        }

        let location = media_location(&self.context.endpoints().media, &record.path)?;
        let mut update = Document::new();
        update.insert("location".into(), Value::from(location.clone()));
        update.insert("published".into(), Value::Bool(true));
        self.context.entries()?.save(&key, update).await?;

        record.location = Some(location);
        record.published = true;

        if attach_id == doc_id {
            let document_key = EntryKind::Document.key(doc_id);
            self.fetch(document_key.clone()).await?;
            let mut update = Document::new();
            update.insert("published".into(), Value::Bool(true));
            self.context.entries()?.save(&document_key, update).await?;
        }

        tracing::debug!(%path, "Published attachment");
        Ok(AttachmentView {
            id: attach_id.to_string(),
            record,
        })
    }

    /// Read an attachment of a document.
    pub async fn get_attachment(
        &self,
        doc_id: &str,
        attach_id: &str,
    ) -> Result<AttachmentView, ApiError> {
        Ok(AttachmentView {
            id: attach_id.to_string(),
            record: self.attachment_of(doc_id, attach_id).await?,
        })
    }

    /// Identifiers of every attachment of a document, published or not.
    pub async fn list_attachment_ids(&self, doc_id: &str) -> Result<Vec<String>, ApiError> {
        let rows = self
            .rows_for_document(doc_id, ATTACHMENTS_BY_DOCUMENT)
            .await?;
        Ok(rows
            .iter()
            .map(|row| strip_prefix(&row.id).to_string())
            .collect())
    }

    /// Settings of the attachment's MIME type, after checking the declared
    /// length against them.
    pub(super) fn media_type(&self, spec: &AttachmentSpec) -> Result<&MediaType, ApiError> {
        let media_type = self
            .context
            .config()
            .media_types
            .get(&spec.content_type)
            .ok_or_else(|| ApiError::UnsupportedMediaType(spec.content_type.clone()))?;

        if spec.content_length == 0 {
            return Err(ApiError::validation("attachment must not be empty"));
        }
        if spec.content_length > media_type.max_size {
            return Err(ApiError::PayloadTooLarge(format!(
                "{} allows at most {} bytes",
                spec.content_type, media_type.max_size
            )));
        }
        Ok(media_type)
    }

    /// Write the attachment record and mint the token that authorizes the
    /// upload of exactly the declared bytes.
    pub(super) async fn upload_ticket(
        &self,
        principal: &Principal,
        doc_id: &str,
        attach_id: &str,
        spec: &AttachmentSpec,
        media_type: &MediaType,
    ) -> Result<UploadTicket, ApiError> {
        let path = format!("{doc_id}/{attach_id}{}", media_type.extension);
        let record = AttachmentRecord {
            mime: spec.content_type.clone(),
            size: spec.content_length,
            doc_id: doc_id.to_string(),
            uploader: principal.as_str().to_string(),
            uploaded: Utc::now(),
            path: path.clone(),
            location: None,
            published: false,
        };
        self.insert_entry(EntryKind::Attachment.key(attach_id), &record)
            .await?;

        let key = self.context.signer().sign_upload(
            "PUT",
            principal.as_str(),
            &format!("/{path}"),
            spec.content_length,
            &spec.content_type,
        );
        let location = media_location(&self.context.endpoints().media, &path)?;
        let uri = format!("{location}?key={key}");

        tracing::debug!(%path, "Minted upload ticket");
        Ok(UploadTicket {
            key: key.into_string(),
            location,
            uri,
        })
    }

    async fn attachment_of(
        &self,
        doc_id: &str,
        attach_id: &str,
    ) -> Result<AttachmentRecord, ApiError> {
        check_id("document id", doc_id)?;
        check_id("attachment id", attach_id)?;

        let key = EntryKind::Attachment.key(attach_id);
        let record = AttachmentRecord::from_document(self.fetch(key.clone()).await?)?;
        if record.doc_id != doc_id {
            return Err(ApiError::NotFound(key));
        }
        Ok(record)
    }
}

fn media_location(base: &Url, path: &str) -> Result<String, ApiError> {
    base.join(path)
        .map(String::from)
        .map_err(|error| ApiError::internal(error.to_string()))
}
