use chrono::{DateTime, Utc};
use diretto_credentials::Principal;
use diretto_store::Connection;
use futures_util::future::join;
use serde::{Deserialize, Serialize};

use crate::entry::{
    DocumentRecord, Entry, EntryKind, SpatialRecord, TemporalRecord, check_id,
};
use crate::{ApiError, AttachmentSpec, MetadataService, UploadTicket};

/// A claimed location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Longitude in degrees
    pub lon: f64,
    /// Latitude in degrees
    pub lat: f64,
    /// Uncertainty radius in metres
    pub variance: f64,
}

impl Position {
    pub(crate) fn check(&self) -> Result<(), ApiError> {
        let valid = self.lon.is_finite()
            && self.lat.is_finite()
            && self.variance.is_finite()
            && (-180.0..=180.0).contains(&self.lon)
            && (-90.0..=90.0).contains(&self.lat)
            && self.variance >= 0.0;
        if valid {
            Ok(())
        } else {
            Err(ApiError::validation("invalid position"))
        }
    }
}

/// A claimed time span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpan {
    /// Earliest plausible time
    pub after: DateTime<Utc>,
    /// Latest plausible time
    pub before: DateTime<Utc>,
}

impl TimeSpan {
    pub(crate) fn check(&self) -> Result<(), ApiError> {
        if self.after <= self.before {
            Ok(())
        } else {
            Err(ApiError::validation("time span ends before it starts"))
        }
    }
}

/// A submission: the primary attachment plus optional claims about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    /// The primary attachment
    pub attachment: AttachmentSpec,
    /// Where it was recorded
    #[serde(default)]
    pub position: Option<Position>,
    /// When it was recorded
    #[serde(default)]
    pub date: Option<TimeSpan>,
}

/// A document record together with its identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentView {
    /// Document identifier
    pub id: String,
    /// The stored record
    #[serde(flatten)]
    pub record: DocumentRecord,
}

impl<C: Connection> MetadataService<C> {
    /// Create a document and mint the upload ticket of its primary
    /// attachment, which shares the document's identifier.
    ///
    /// Position and time claims are written after the document and
    /// alongside the ticket. A failure to store them is logged and does not
    /// fail the creation.
    #[tracing::instrument(level = "debug", skip(self, principal, document), fields(principal = %principal))]
    pub async fn create_document(
        &self,
        principal: &Principal,
        doc_id: &str,
        document: NewDocument,
    ) -> Result<UploadTicket, ApiError> {
        check_id("document id", doc_id)?;
        let media_type = self.media_type(&document.attachment)?;
        if let Some(position) = &document.position {
            position.check()?;
        }
        if let Some(date) = &document.date {
            date.check()?;
        }

        let now = Utc::now();
        let record = DocumentRecord {
            published: false,
            mediatype: media_type.kind.clone(),
            owner: principal.as_str().to_string(),
            uploaded: now,
        };
        self.insert_entry(EntryKind::Document.key(doc_id), &record)
            .await?;

        let (ticket, ()) = join(
            self.upload_ticket(principal, doc_id, doc_id, &document.attachment, media_type),
            self.write_claims(principal, doc_id, document.position, document.date, now),
        )
        .await;
        ticket
    }

    /// Read a document.
    pub async fn get_document(&self, doc_id: &str) -> Result<DocumentView, ApiError> {
        check_id("document id", doc_id)?;
        let document = self.fetch(EntryKind::Document.key(doc_id)).await?;
        Ok(DocumentView {
            id: doc_id.to_string(),
            record: DocumentRecord::from_document(document)?,
        })
    }

    async fn write_claims(
        &self,
        principal: &Principal,
        doc_id: &str,
        position: Option<Position>,
        date: Option<TimeSpan>,
        submitted: DateTime<Utc>,
    ) {
        let spatial = async {
            let Some(position) = position else {
                return Ok(());
            };
            let record = SpatialRecord {
                doc_id: doc_id.to_string(),
                lon: position.lon,
                lat: position.lat,
                variance: position.variance,
                by_user: principal.as_str().to_string(),
                submitted,
            };
            self.insert_entry(EntryKind::Spatial.key(doc_id), &record)
                .await
        };

        let temporal = async {
            let Some(date) = date else {
                return Ok(());
            };
            let record = TemporalRecord {
                doc_id: doc_id.to_string(),
                after: date.after,
                before: date.before,
                by_user: principal.as_str().to_string(),
                submitted,
            };
            self.insert_entry(EntryKind::Temporal.key(doc_id), &record)
                .await
        };

        let (spatial, temporal) = join(spatial, temporal).await;
        for (claim, outcome) in [("position", spatial), ("time", temporal)] {
            if let Err(error) = outcome {
                tracing::warn!(doc_id, claim, %error, "Failed to store document claim");
            }
        }
    }
}
