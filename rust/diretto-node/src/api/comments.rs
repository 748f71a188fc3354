use chrono::Utc;
use diretto_common::JoinBarrier;
use diretto_credentials::Principal;
use diretto_store::Connection;
use serde::{Deserialize, Serialize};

use super::record_of;
use crate::entry::{AttachmentRecord, CommentRecord, Entry, EntryKind, check_id, strip_prefix};
use crate::error::joined;
use crate::views::{COMMENTS_BY_ATTACHMENT, attachment_key};
use crate::{ApiError, Listing, MetadataService};

/// Bounds on the length of a comment, in characters.
pub const COMMENT_LENGTH: std::ops::RangeInclusive<usize> = 3..=1000;

/// A comment record together with its identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentView {
    /// Comment identifier
    pub id: String,
    /// The stored record
    #[serde(flatten)]
    pub record: CommentRecord,
}

impl<C: Connection> MetadataService<C> {
    /// Comment on an attachment. Returns the identifier of the comment.
    #[tracing::instrument(level = "debug", skip(self, principal, comment), fields(principal = %principal))]
    pub async fn create_comment(
        &self,
        principal: &Principal,
        doc_id: &str,
        attach_id: &str,
        comment: &str,
    ) -> Result<String, ApiError> {
        check_id("document id", doc_id)?;
        check_id("attachment id", attach_id)?;
        if !COMMENT_LENGTH.contains(&comment.chars().count()) {
            return Err(ApiError::validation(format!(
                "comments are {} to {} characters long",
                COMMENT_LENGTH.start(),
                COMMENT_LENGTH.end()
            )));
        }

        let (joiner, settlement) =
            JoinBarrier::settle(3, || ApiError::internal("Comment failed"));
        let id = joiner.spawn(self.allocate_id());
        let _document = joiner.spawn(self.fetch(EntryKind::Document.key(doc_id)));
        let attachment = joiner.spawn(self.fetch(EntryKind::Attachment.key(attach_id)));
        drop(joiner);
        settlement.wait().await?;

        let id = joined(id).await?;
        let attachment = AttachmentRecord::from_document(joined(attachment).await?)?;
        if attachment.doc_id != doc_id {
            return Err(ApiError::NotFound(EntryKind::Attachment.key(attach_id)));
        }

        let record = CommentRecord {
            doc_id: doc_id.to_string(),
            attachment_id: attach_id.to_string(),
            comment: comment.to_string(),
            user: principal.as_str().to_string(),
            created: Utc::now(),
        };
        self.insert_entry(EntryKind::Comment.key(&id), &record)
            .await?;
        Ok(id)
    }

    /// The comments on an attachment, in identifier order.
    pub async fn list_comments(
        &self,
        doc_id: &str,
        attach_id: &str,
    ) -> Result<Listing<CommentView>, ApiError> {
        check_id("document id", doc_id)?;
        check_id("attachment id", attach_id)?;
        self.check_attachment(doc_id, attach_id).await?;

        let rows = self
            .rows_under(COMMENTS_BY_ATTACHMENT, attachment_key(doc_id, attach_id))
            .await?;
        let total = rows.len();
        let items = rows
            .into_iter()
            .take(self.context.config().api.page_size)
            .map(|row| {
                Ok(CommentView {
                    id: strip_prefix(&row.id).to_string(),
                    record: record_of(row)?,
                })
            })
            .collect::<Result<_, ApiError>>()?;
        Ok(Listing { items, total })
    }

    /// Read a comment.
    pub async fn get_comment(&self, comment_id: &str) -> Result<CommentView, ApiError> {
        check_id("comment id", comment_id)?;
        let document = self.fetch(EntryKind::Comment.key(comment_id)).await?;
        Ok(CommentView {
            id: comment_id.to_string(),
            record: CommentRecord::from_document(document)?,
        })
    }
}
