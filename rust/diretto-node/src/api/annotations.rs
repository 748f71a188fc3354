use chrono::Utc;
use diretto_common::JoinBarrier;
use diretto_credentials::Principal;
use diretto_store::{Connection, ViewRow};
use serde::{Deserialize, Serialize};

use super::record_of;
use crate::entry::{Entry, EntryKind, SpatialRecord, TemporalRecord, check_id, strip_prefix};
use crate::error::joined;
use crate::views::{POSITIONS_BY_DOCUMENT, TIMES_BY_DOCUMENT};
use crate::{ApiError, MetadataService, Position, TimeSpan};

/// A position claim together with its identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionView {
    /// Claim identifier
    pub id: String,
    /// The stored record
    #[serde(flatten)]
    pub record: SpatialRecord,
}

/// A time claim together with its identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeView {
    /// Claim identifier
    pub id: String,
    /// The stored record
    #[serde(flatten)]
    pub record: TemporalRecord,
}

impl<C: Connection> MetadataService<C> {
    /// Claim a further position for an existing document. Returns the
    /// identifier of the new claim.
    #[tracing::instrument(level = "debug", skip(self, principal), fields(principal = %principal))]
    pub async fn add_position(
        &self,
        principal: &Principal,
        doc_id: &str,
        position: Position,
    ) -> Result<String, ApiError> {
        check_id("document id", doc_id)?;
        position.check()?;

        let id = self.claim_id(doc_id).await?;
        let record = SpatialRecord {
            doc_id: doc_id.to_string(),
            lon: position.lon,
            lat: position.lat,
            variance: position.variance,
            by_user: principal.as_str().to_string(),
            submitted: Utc::now(),
        };
        self.insert_entry(EntryKind::Spatial.key(&id), &record)
            .await?;
        Ok(id)
    }

    /// Claim a further time span for an existing document. Returns the
    /// identifier of the new claim.
    #[tracing::instrument(level = "debug", skip(self, principal), fields(principal = %principal))]
    pub async fn add_time(
        &self,
        principal: &Principal,
        doc_id: &str,
        span: TimeSpan,
    ) -> Result<String, ApiError> {
        check_id("document id", doc_id)?;
        span.check()?;

        let id = self.claim_id(doc_id).await?;
        let record = TemporalRecord {
            doc_id: doc_id.to_string(),
            after: span.after,
            before: span.before,
            by_user: principal.as_str().to_string(),
            submitted: Utc::now(),
        };
        self.insert_entry(EntryKind::Temporal.key(&id), &record)
            .await?;
        Ok(id)
    }

    /// Every position claimed for a document, in identifier order. The
    /// claim made with the document shares its identifier.
    pub async fn list_positions(&self, doc_id: &str) -> Result<Vec<PositionView>, ApiError> {
        self.rows_for_document(doc_id, POSITIONS_BY_DOCUMENT)
            .await?
            .into_iter()
            .map(|row| {
                Ok(PositionView {
                    id: strip_prefix(&row.id).to_string(),
                    record: record_of(row)?,
                })
            })
            .collect()
    }

    /// Read a position claim.
    pub async fn get_position(&self, position_id: &str) -> Result<PositionView, ApiError> {
        check_id("position id", position_id)?;
        let document = self.fetch(EntryKind::Spatial.key(position_id)).await?;
        Ok(PositionView {
            id: position_id.to_string(),
            record: SpatialRecord::from_document(document)?,
        })
    }

    /// Every time span claimed for a document, in identifier order.
    pub async fn list_times(&self, doc_id: &str) -> Result<Vec<TimeView>, ApiError> {
        self.rows_for_document(doc_id, TIMES_BY_DOCUMENT)
            .await?
            .into_iter()
            .map(|row| {
                Ok(TimeView {
                    id: strip_prefix(&row.id).to_string(),
                    record: record_of(row)?,
                })
            })
            .collect()
    }

    /// Read a time claim.
    pub async fn get_time(&self, time_id: &str) -> Result<TimeView, ApiError> {
        check_id("time id", time_id)?;
        let document = self.fetch(EntryKind::Temporal.key(time_id)).await?;
        Ok(TimeView {
            id: time_id.to_string(),
            record: TemporalRecord::from_document(document)?,
        })
    }

    /// Read the rows `view` holds for a document, checking that the document
    /// exists alongside.
    pub(super) async fn rows_for_document(
        &self,
        doc_id: &str,
        view: &'static str,
    ) -> Result<Vec<ViewRow>, ApiError> {
        check_id("document id", doc_id)?;

        let (joiner, settlement) =
            JoinBarrier::settle(2, || ApiError::internal("Document lookup failed"));
        let _document = joiner.spawn(self.fetch(EntryKind::Document.key(doc_id)));
        let rows = joiner.spawn(self.rows_under(view, doc_id.to_string()));
        drop(joiner);
        settlement.wait().await?;

        joined(rows).await
    }

    /// Allocate an identifier while checking that the document exists.
    async fn claim_id(&self, doc_id: &str) -> Result<String, ApiError> {
        let (joiner, settlement) =
            JoinBarrier::settle(2, || ApiError::internal("Claim failed"));
        let id = joiner.spawn(self.allocate_id());
        let _document = joiner.spawn(self.fetch(EntryKind::Document.key(doc_id)));
        drop(joiner);
        settlement.wait().await?;

        joined(id).await
    }
}
