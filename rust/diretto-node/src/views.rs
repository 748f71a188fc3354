//! Views the services read, and their map functions for the in-memory store.

use diretto_store::{Document, MemoryStoreProvider};
use serde_json::{Value, json};

use crate::entry::{
    AttachmentRecord, CommentRecord, DocumentRecord, Entry, EntryKind, SpatialRecord, TagRecord,
    TemporalRecord, VoteRecord, sortable_time, strip_prefix,
};

/// Every user, keyed by username
pub const USERS_BY_ID: &str = "users/byId";

/// Published documents, keyed by upload time
pub const DOCUMENTS_BY_UPLOAD_DATE: &str = "entries/docsByUploadDate";

/// Published attachments, keyed by upload time
pub const ATTACHMENTS_BY_DATE: &str = "entries/attachmentsByDate";

/// Votes, keyed by the key of the record voted on
pub const VOTES: &str = "entries/votes";

/// Attachments, keyed by their document
pub const ATTACHMENTS_BY_DOCUMENT: &str = "entries/attachmentsByDoc";

/// Position claims, keyed by their document
pub const POSITIONS_BY_DOCUMENT: &str = "entries/posByDoc";

/// Time claims, keyed by their document
pub const TIMES_BY_DOCUMENT: &str = "entries/timesByDoc";

/// Comments, keyed by [attachment_key]
pub const COMMENTS_BY_ATTACHMENT: &str = "entries/commentsByAttachment";

/// Tags, keyed by [attachment_key]
pub const TAGS_BY_ATTACHMENT: &str = "entries/tagsByAttachment";

/// The key records about one attachment of a document appear under.
pub fn attachment_key(doc_id: &str, attach_id: &str) -> String {
    format!("{doc_id}/{attach_id}")
}

/// The key a record appears under in the date-ordered views.
///
/// The record key is appended so that records created in the same
/// millisecond still get distinct, stable positions.
pub fn date_key(time: &chrono::DateTime<chrono::Utc>, key: &str) -> String {
    format!("{} {}", sortable_time(time), key)
}

fn typed<T: Entry>(document: &Document) -> Option<T> {
    let kind = document.get("type").and_then(Value::as_str)?;
    if EntryKind::from_type_name(kind)? != T::KIND {
        return None;
    }
    T::from_document(document.clone()).ok()
}

/// Map function of [USERS_BY_ID].
pub fn users_by_id(id: &str, document: &Document) -> Vec<(String, Value)> {
    match document.get("username") {
        Some(username) => vec![(id.to_string(), username.clone())],
        None => vec![],
    }
}

/// Map function of [DOCUMENTS_BY_UPLOAD_DATE].
pub fn documents_by_upload_date(id: &str, document: &Document) -> Vec<(String, Value)> {
    match typed::<DocumentRecord>(document) {
        Some(record) if record.published => vec![(
            date_key(&record.uploaded, id),
            json!({
                "id": strip_prefix(id),
                "mediatype": record.mediatype,
                "owner": record.owner,
                "uploaded": sortable_time(&record.uploaded),
            }),
        )],
        _ => vec![],
    }
}

/// Map function of [ATTACHMENTS_BY_DATE].
pub fn attachments_by_date(id: &str, document: &Document) -> Vec<(String, Value)> {
    match typed::<AttachmentRecord>(document) {
        Some(record) if record.published => vec![(
            date_key(&record.uploaded, id),
            json!({
                "id": strip_prefix(id),
                "doc_id": record.doc_id,
                "mime": record.mime,
                "size": record.size,
                "location": record.location,
                "uploader": record.uploader,
                "uploaded": sortable_time(&record.uploaded),
            }),
        )],
        _ => vec![],
    }
}

/// Map function of [VOTES].
pub fn votes(_id: &str, document: &Document) -> Vec<(String, Value)> {
    match typed::<VoteRecord>(document) {
        Some(record) => vec![(record.entity_id, Value::from(record.vote))],
        None => vec![],
    }
}

/// Map function of [ATTACHMENTS_BY_DOCUMENT]. Unpublished attachments are
/// listed too.
pub fn attachments_by_document(_id: &str, document: &Document) -> Vec<(String, Value)> {
    match typed::<AttachmentRecord>(document) {
        Some(record) => vec![(record.doc_id, Value::Null)],
        None => vec![],
    }
}

/// Map function of [POSITIONS_BY_DOCUMENT].
pub fn positions_by_document(_id: &str, document: &Document) -> Vec<(String, Value)> {
    match typed::<SpatialRecord>(document) {
        Some(record) => vec![(record.doc_id, Value::Object(document.clone()))],
        None => vec![],
    }
}

/// Map function of [TIMES_BY_DOCUMENT].
pub fn times_by_document(_id: &str, document: &Document) -> Vec<(String, Value)> {
    match typed::<TemporalRecord>(document) {
        Some(record) => vec![(record.doc_id, Value::Object(document.clone()))],
        None => vec![],
    }
}

/// Map function of [COMMENTS_BY_ATTACHMENT].
pub fn comments_by_attachment(_id: &str, document: &Document) -> Vec<(String, Value)> {
    match typed::<CommentRecord>(document) {
        Some(record) => vec![(
            attachment_key(&record.doc_id, &record.attachment_id),
            Value::Object(document.clone()),
        )],
        None => vec![],
    }
}

/// Map function of [TAGS_BY_ATTACHMENT].
pub fn tags_by_attachment(_id: &str, document: &Document) -> Vec<(String, Value)> {
    match typed::<TagRecord>(document) {
        Some(record) => vec![(
            attachment_key(&record.doc_id, &record.attachment_id),
            Value::Object(document.clone()),
        )],
        None => vec![],
    }
}

/// Define every view on an in-memory store.
pub fn install(provider: &MemoryStoreProvider) {
    provider.define_view(USERS_BY_ID, users_by_id);
    provider.define_view(DOCUMENTS_BY_UPLOAD_DATE, documents_by_upload_date);
    provider.define_view(ATTACHMENTS_BY_DATE, attachments_by_date);
    provider.define_view(VOTES, votes);
    provider.define_view(ATTACHMENTS_BY_DOCUMENT, attachments_by_document);
    provider.define_view(POSITIONS_BY_DOCUMENT, positions_by_document);
    provider.define_view(TIMES_BY_DOCUMENT, times_by_document);
    provider.define_view(COMMENTS_BY_ATTACHMENT, comments_by_attachment);
    provider.define_view(TAGS_BY_ATTACHMENT, tags_by_attachment);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn it_only_lists_published_documents() -> anyhow::Result<()> {
        let mut record = DocumentRecord {
            published: false,
            mediatype: "image".into(),
            owner: "alice".into(),
            uploaded: Utc::now(),
        };
        assert!(documents_by_upload_date("d-doc1", &record.to_document()?).is_empty());

        record.published = true;
        let rows = documents_by_upload_date("d-doc1", &record.to_document()?);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].0.ends_with(" d-doc1"));
        assert_eq!(rows[0].1["id"], json!("doc1"));
        Ok(())
    }

    #[test]
    fn it_keys_comments_by_their_attachment() -> anyhow::Result<()> {
        let comment = CommentRecord {
            doc_id: "doc1".into(),
            attachment_id: "att1".into(),
            comment: "Nice light".into(),
            user: "alice".into(),
            created: Utc::now(),
        };
        let document = comment.to_document()?;

        let rows = comments_by_attachment("c-1", &document);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "doc1/att1");
        assert_eq!(rows[0].1["comment"], json!("Nice light"));
        assert!(tags_by_attachment("c-1", &document).is_empty());
        assert!(attachments_by_document("c-1", &document).is_empty());
        Ok(())
    }

    #[test]
    fn it_ignores_records_of_other_kinds() -> anyhow::Result<()> {
        let vote = VoteRecord {
            user: "alice".into(),
            entity_id: "d-doc1".into(),
            vote: 1,
            submitted: Utc::now(),
        };
        let document = vote.to_document()?;

        assert!(documents_by_upload_date("v-alice--d-doc1", &document).is_empty());
        assert_eq!(
            votes("v-alice--d-doc1", &document),
            vec![("d-doc1".to_string(), json!(1))]
        );
        Ok(())
    }
}
