use chrono::Utc;
use diretto_common::JoinBarrier;
use diretto_credentials::Principal;
use diretto_store::{Connection, DocumentStore, ViewQuery};
use serde::{Deserialize, Serialize};

use crate::entry::{Entry, EntryKind, VoteRecord, check_id};
use crate::error::joined;
use crate::views::VOTES;
use crate::{ApiError, MetadataService};

/// Whether a vote was new or replaced an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteOutcome {
    /// First vote of the principal on this record
    Created,
    /// The principal's earlier vote was replaced
    Updated,
}

/// Votes on a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    /// The asking principal's own vote, if any
    pub user: Option<i8>,
    /// Positive votes
    pub up: usize,
    /// Negative votes
    pub down: usize,
}

fn vote_key(principal: &Principal, entity_key: &str) -> String {
    EntryKind::Vote.key(&format!("{principal}--{entity_key}"))
}

fn entity_key(kind: EntryKind, entity_id: &str) -> Result<String, ApiError> {
    if kind == EntryKind::Vote {
        return Err(ApiError::validation("votes cannot be voted on"));
    }
    check_id("entity id", entity_id)?;
    Ok(kind.key(entity_id))
}

impl<C: Connection> MetadataService<C> {
    /// Vote on a record. Any positive value counts as 1, any negative as -1.
    #[tracing::instrument(level = "debug", skip(self, principal), fields(principal = %principal))]
    pub async fn vote(
        &self,
        principal: &Principal,
        kind: EntryKind,
        entity_id: &str,
        value: i64,
    ) -> Result<VoteOutcome, ApiError> {
        let entity_key = entity_key(kind, entity_id)?;
        self.fetch(entity_key.clone()).await?;

        let key = vote_key(principal, &entity_key);
        let record = VoteRecord {
            user: principal.as_str().to_string(),
            entity_id: entity_key,
            vote: value.signum() as i8,
            submitted: Utc::now(),
        };

        match self.insert_entry(key.clone(), &record).await {
            Ok(()) => Ok(VoteOutcome::Created),
            Err(ApiError::Conflict(_)) => {
                self.context
                    .entries()?
                    .save(&key, record.to_document()?)
                    .await?;
                Ok(VoteOutcome::Updated)
            }
            Err(error) => Err(error),
        }
    }

    /// Withdraw the principal's vote on a record.
    #[tracing::instrument(level = "debug", skip(self, principal), fields(principal = %principal))]
    pub async fn delete_vote(
        &self,
        principal: &Principal,
        kind: EntryKind,
        entity_id: &str,
    ) -> Result<(), ApiError> {
        let key = vote_key(principal, &entity_key(kind, entity_id)?);
        Ok(self.context.entries()?.remove(&key).await?)
    }

    /// Count the votes on a record, along with the principal's own.
    pub async fn list_votes(
        &self,
        principal: &Principal,
        kind: EntryKind,
        entity_id: &str,
    ) -> Result<VoteTally, ApiError> {
        let entity_key = entity_key(kind, entity_id)?;
        let entries = self.context.entries()?;
        let own = self.fetch(vote_key(principal, &entity_key));

        let (joiner, settlement) =
            JoinBarrier::settle(2, || ApiError::internal("Vote listing failed"));
        let rows = joiner.spawn(async move {
            let query = ViewQuery::new().with_key(entity_key);
            Ok::<_, ApiError>(entries.view(VOTES, &query).await?.rows)
        });
        let own = joiner.spawn(async move {
            match own.await {
                Ok(document) => Ok::<_, ApiError>(Some(VoteRecord::from_document(document)?.vote)),
                Err(ApiError::NotFound(_)) => Ok(None),
                Err(error) => Err(error),
            }
        });
        drop(joiner);
        settlement.wait().await?;

        let mut tally = VoteTally {
            user: joined(own).await?,
            ..VoteTally::default()
        };
        for row in joined(rows).await? {
            match row.value.as_i64().map(i64::signum) {
                Some(1) => tally.up += 1,
                Some(-1) => tally.down += 1,
                _ => {}
            }
        }
        Ok(tally)
    }
}
