use chrono::Utc;
use diretto_credentials::Principal;
use diretto_store::Connection;
use serde::{Deserialize, Serialize};

use super::record_of;
use crate::entry::{Entry, EntryKind, TagRecord, check_id, strip_prefix};
use crate::views::{TAGS_BY_ATTACHMENT, attachment_key};
use crate::{ApiError, Listing, MetadataService};

/// Bounds on the length of a tag, in characters.
pub const TAG_LENGTH: std::ops::RangeInclusive<usize> = 3..=100;

/// Outcome of tagging an attachment, carrying the tag identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tagged {
    /// The attachment was not tagged with this text before
    Created(String),
    /// Someone already applied the same tag
    Existing(String),
}

/// A tag record together with its identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagView {
    /// Tag identifier
    pub id: String,
    /// The stored record
    #[serde(flatten)]
    pub record: TagRecord,
}

/// The identifier of a tag text.
pub fn tag_id(tag: &str) -> String {
    format!("{:x}", md5::compute(tag.as_bytes()))
}

impl<C: Connection> MetadataService<C> {
    /// Tag an attachment.
    #[tracing::instrument(level = "debug", skip(self, principal), fields(principal = %principal))]
    pub async fn create_tag(
        &self,
        principal: &Principal,
        doc_id: &str,
        attach_id: &str,
        tag: &str,
    ) -> Result<Tagged, ApiError> {
        check_id("document id", doc_id)?;
        check_id("attachment id", attach_id)?;
        if !TAG_LENGTH.contains(&tag.chars().count()) {
            return Err(ApiError::validation(format!(
                "tags are {} to {} characters long",
                TAG_LENGTH.start(),
                TAG_LENGTH.end()
            )));
        }

        self.check_attachment(doc_id, attach_id).await?;

        let id = tag_id(tag);
        let record = TagRecord {
            doc_id: doc_id.to_string(),
            attachment_id: attach_id.to_string(),
            tag: tag.to_string(),
            user: principal.as_str().to_string(),
            created: Utc::now(),
        };
        match self.insert_entry(tag_key(&id, attach_id), &record).await {
            Ok(()) => Ok(Tagged::Created(id)),
            Err(ApiError::Conflict(_)) => Ok(Tagged::Existing(id)),
            Err(error) => Err(error),
        }
    }

    /// The tags of an attachment, in tag identifier order.
    pub async fn list_tags(
        &self,
        doc_id: &str,
        attach_id: &str,
    ) -> Result<Listing<TagView>, ApiError> {
        check_id("document id", doc_id)?;
        check_id("attachment id", attach_id)?;
        self.check_attachment(doc_id, attach_id).await?;

        let rows = self
            .rows_under(TAGS_BY_ATTACHMENT, attachment_key(doc_id, attach_id))
            .await?;
        let total = rows.len();
        let items = rows
            .into_iter()
            .take(self.context.config().api.page_size)
            .map(|row| {
                Ok(TagView {
                    id: tag_of_key(&row.id).to_string(),
                    record: record_of(row)?,
                })
            })
            .collect::<Result<_, ApiError>>()?;
        Ok(Listing { items, total })
    }

    /// Read one tag of an attachment.
    pub async fn get_tag(
        &self,
        doc_id: &str,
        attach_id: &str,
        tag_id: &str,
    ) -> Result<TagView, ApiError> {
        check_id("attachment id", attach_id)?;
        check_id("tag id", tag_id)?;

        let key = tag_key(tag_id, attach_id);
        let record = TagRecord::from_document(self.fetch(key.clone()).await?)?;
        if record.doc_id != doc_id {
            return Err(ApiError::NotFound(key));
        }
        Ok(TagView {
            id: tag_id.to_string(),
            record,
        })
    }
}

/// Tags are stored once per text and attachment.
fn tag_key(tag_id: &str, attach_id: &str) -> String {
    EntryKind::Tag.key(&format!("{tag_id}--{}", EntryKind::Attachment.key(attach_id)))
}

fn tag_of_key(key: &str) -> &str {
    let id = strip_prefix(key);
    id.split_once("--").map_or(id, |(tag_id, _)| tag_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_derives_tag_ids_from_the_text() {
        assert_eq!(tag_id("sunset"), "88eb60614bb67782bd8c18afb4438329");
        assert_ne!(tag_id("sunset"), tag_id("Sunset"));
    }

    #[test]
    fn it_recovers_tag_ids_from_keys() {
        let key = tag_key("88eb60614bb67782bd8c18afb4438329", "att1");
        assert_eq!(key, "t-88eb60614bb67782bd8c18afb4438329--a-att1");
        assert_eq!(tag_of_key(&key), "88eb60614bb67782bd8c18afb4438329");
    }
}
