//! Typed metadata records and the identifiers they are stored under.

use chrono::{DateTime, SecondsFormat, Utc};
use diretto_store::{Document, decode, encode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::ApiError;

/// Kinds of records in the `entries` table.
///
/// Every record is stored under `<prefix>-<id>` and carries its kind's
/// name in a `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// A file belonging to a document
    Attachment,
    /// The root of a submission
    Document,
    /// A tag on an attachment
    Tag,
    /// A position claimed for a document
    Spatial,
    /// A comment on an attachment
    Comment,
    /// A principal's vote on a record
    Vote,
    /// A time span claimed for a document
    Temporal,
}

impl EntryKind {
    /// The key prefix
    pub fn prefix(&self) -> &'static str {
        match self {
            EntryKind::Attachment => "a",
            EntryKind::Document => "d",
            EntryKind::Tag => "t",
            EntryKind::Spatial => "s",
            EntryKind::Comment => "c",
            EntryKind::Vote => "v",
            EntryKind::Temporal => "z",
        }
    }

    /// The value of the `type` field
    pub fn type_name(&self) -> &'static str {
        match self {
            EntryKind::Attachment => "attachment",
            EntryKind::Document => "document",
            EntryKind::Tag => "tag",
            EntryKind::Spatial => "spatial",
            EntryKind::Comment => "comment",
            EntryKind::Vote => "vote",
            EntryKind::Temporal => "temporal",
        }
    }

    /// The key a record of this kind with identifier `id` is stored under
    pub fn key(&self, id: &str) -> String {
        format!("{}-{}", self.prefix(), id)
    }

    /// The kind whose `type` field is `name`
    pub fn from_type_name(name: &str) -> Option<Self> {
        [
            EntryKind::Attachment,
            EntryKind::Document,
            EntryKind::Tag,
            EntryKind::Spatial,
            EntryKind::Comment,
            EntryKind::Vote,
            EntryKind::Temporal,
        ]
        .into_iter()
        .find(|kind| kind.type_name() == name)
    }
}

/// Strip the `<prefix>-` from a stored key.
pub fn strip_prefix(key: &str) -> &str {
    key.split_once('-').map_or(key, |(_, id)| id)
}

/// Format a 32 character hex identifier as `8-4-4-4-12`. Anything else is
/// returned unchanged.
pub fn to_uuid(raw: &str) -> String {
    if raw.len() == 32 && raw.is_ascii() {
        format!(
            "{}-{}-{}-{}-{}",
            &raw[0..8],
            &raw[8..12],
            &raw[12..16],
            &raw[16..20],
            &raw[20..32]
        )
    } else {
        raw.to_string()
    }
}

/// Whether `id` is usable as a client-chosen identifier.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'-')
}

pub(crate) fn check_id(field: &str, id: &str) -> Result<(), ApiError> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(ApiError::validation(format!("invalid {field}")))
    }
}

/// Timestamps as they appear in view keys: fixed width, so that keys sort
/// chronologically.
pub fn sortable_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A record type stored in the `entries` table.
pub trait Entry: Serialize + DeserializeOwned {
    /// The kind of record
    const KIND: EntryKind;

    /// Encode this record, adding its `type` field.
    fn to_document(&self) -> Result<Document, ApiError> {
        let mut document = encode(self)?;
        document.insert("type".into(), Value::from(Self::KIND.type_name()));
        Ok(document)
    }

    /// Decode a stored record.
    fn from_document(document: Document) -> Result<Self, ApiError> {
        Ok(decode(document)?)
    }
}

/// The root of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Whether the primary attachment has been published
    pub published: bool,
    /// Media kind of the primary attachment
    pub mediatype: String,
    /// The principal that created the document
    pub owner: String,
    /// Creation time
    pub uploaded: DateTime<Utc>,
}

impl Entry for DocumentRecord {
    const KIND: EntryKind = EntryKind::Document;
}

/// Lifecycle of an attachment as seen across both services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentState {
    /// Metadata written and a token minted, no bytes yet
    AwaitingUpload,
    /// Bytes accepted by the storage service, not yet published
    Uploaded,
    /// A verified publish token was presented by the uploader
    Published,
}

/// A file belonging to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    /// Declared MIME type
    pub mime: String,
    /// Declared length in bytes
    pub size: u64,
    /// The owning document
    pub doc_id: String,
    /// The principal allowed to upload and publish
    pub uploader: String,
    /// Creation time
    pub uploaded: DateTime<Utc>,
    /// Storage path, relative to the storage service root
    pub path: String,
    /// Public URI of the stored bytes, set on publish
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Set on publish
    #[serde(default)]
    pub published: bool,
}

impl AttachmentRecord {
    /// The state of this attachment, given whether the storage service
    /// holds its bytes.
    pub fn state(&self, blob_present: bool) -> AttachmentState {
        if self.published {
            AttachmentState::Published
        } else if blob_present {
            AttachmentState::Uploaded
        } else {
            AttachmentState::AwaitingUpload
        }
    }
}

impl Entry for AttachmentRecord {
    const KIND: EntryKind = EntryKind::Attachment;
}

/// A position claimed for a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialRecord {
    /// The document the position belongs to
    pub doc_id: String,
    /// Longitude
    pub lon: f64,
    /// Latitude
    pub lat: f64,
    /// Uncertainty radius
    pub variance: f64,
    /// The principal that made the claim
    pub by_user: String,
    /// Submission time
    pub submitted: DateTime<Utc>,
}

impl Entry for SpatialRecord {
    const KIND: EntryKind = EntryKind::Spatial;
}

/// A time span claimed for a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalRecord {
    /// The document the span belongs to
    pub doc_id: String,
    /// Earliest plausible time
    pub after: DateTime<Utc>,
    /// Latest plausible time
    pub before: DateTime<Utc>,
    /// The principal that made the claim
    pub by_user: String,
    /// Submission time
    pub submitted: DateTime<Utc>,
}

impl Entry for TemporalRecord {
    const KIND: EntryKind = EntryKind::Temporal;
}

/// A comment on an attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    /// The document the attachment belongs to
    pub doc_id: String,
    /// The commented attachment
    pub attachment_id: String,
    /// Comment text
    pub comment: String,
    /// Author
    pub user: String,
    /// Creation time
    pub created: DateTime<Utc>,
}

impl Entry for CommentRecord {
    const KIND: EntryKind = EntryKind::Comment;
}

/// A tag on an attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    /// The document the attachment belongs to
    pub doc_id: String,
    /// The tagged attachment
    pub attachment_id: String,
    /// Tag text
    pub tag: String,
    /// The principal that first applied the tag
    pub user: String,
    /// Creation time
    pub created: DateTime<Utc>,
}

impl Entry for TagRecord {
    const KIND: EntryKind = EntryKind::Tag;
}

/// A principal's vote on a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    /// The voting principal
    pub user: String,
    /// Key of the record voted on
    pub entity_id: String,
    /// -1, 0 or 1
    pub vote: i8,
    /// Time of the latest vote
    pub submitted: DateTime<Utc>,
}

impl Entry for VoteRecord {
    const KIND: EntryKind = EntryKind::Vote;
}

/// An account in the `users` table, stored under its username.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Login name
    pub username: String,
    /// Contact address
    pub email: String,
    /// Login secret
    pub password: String,
}

impl std::fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRecord")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}
