//! Casting a vote.
//!
//! A vote writes to two collections: the voter's ledger entry is marked as
//! voted, and the candidate's tally is incremented. Both writes happen inside
//! one multi-document transaction, so either both are applied or neither is.
//!
//! The ledger write is conditional on `has_voted: false` and upserts on a
//! unique `user_id` index, so a second vote by the same user either fails to
//! match and collides with the existing entry (already voted), or conflicts
//! with a concurrent transaction and is retried until it sees the committed
//! entry. Either way, at most one vote per user is ever committed.

use chrono::Utc;
use mongodb::{
    bson::{self, doc},
    error::Error as DbError,
    options::{FindOneAndUpdateOptions, ReturnDocument, UpdateOptions},
    Client, ClientSession,
};

use crate::error::{Error, Result};
use crate::model::{
    db::{candidate::Candidate, voter::Voter},
    mongodb::{commit_or_abort, is_duplicate_key_error, retry_transient, Coll, Id},
};

/// Points in the transaction at which tests can inject a storage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// After the ledger entry is written, before the tally is incremented.
    AfterLedger,
    /// After both writes, before the commit.
    BeforeCommit,
}

/// A single voter's attempt to vote for a single candidate.
pub struct VoteTransaction<'a> {
    db_client: &'a Client,
    voters: &'a Coll<Voter>,
    candidates: &'a Coll<Candidate>,
    #[cfg(test)]
    fault: Option<FaultPoint>,
}

impl<'a> VoteTransaction<'a> {
    pub fn new(db_client: &'a Client, voters: &'a Coll<Voter>, candidates: &'a Coll<Candidate>) -> Self {
        Self {
            db_client,
            voters,
            candidates,
            #[cfg(test)]
            fault: None,
        }
    }

    /// Make every attempt of this transaction fail at the given point.
    #[cfg(test)]
    pub fn with_fault(mut self, point: FaultPoint) -> Self {
        self.fault = Some(point);
        self
    }

    /// Record a vote by `user_id` for `candidate_id`, returning the candidate
    /// with its updated tally.
    ///
    /// Fails with `NotFound` if the candidate does not exist, and with
    /// `AlreadyVoted` if this user has a committed vote already.
    pub async fn cast(&self, user_id: Id, candidate_id: Id) -> Result<Candidate> {
        // Cheap early rejections. These reads are advisory only: the
        // transaction below re-checks both conditions as part of its writes.
        if self
            .candidates
            .find_one(candidate_id.as_doc(), None)
            .await?
            .is_none()
        {
            return Err(Error::not_found("Candidate"));
        }
        let voter = self.voters.find_one(doc! { "user_id": user_id }, None).await?;
        if voter.map_or(false, |voter| voter.has_voted) {
            return Err(Error::AlreadyVoted);
        }

        retry_transient(&format!("Vote by {user_id}"), || {
            self.attempt(user_id, candidate_id)
        })
        .await
    }

    /// One attempt at the whole transaction. On any failure the transaction is
    /// aborted and nothing is applied.
    async fn attempt(&self, user_id: Id, candidate_id: Id) -> Result<Candidate> {
        let mut session = self.db_client.start_session(None).await?;
        session.start_transaction(None).await?;

        let result = self.apply(&mut session, user_id, candidate_id).await;
        commit_or_abort(&mut session, result).await
    }

    /// The two writes, inside the session's transaction.
    async fn apply(
        &self,
        session: &mut ClientSession,
        user_id: Id,
        candidate_id: Id,
    ) -> Result<Candidate> {
        let now = bson::DateTime::from_chrono(Utc::now());

        // Mark the ledger entry, creating it if this is the user's first contact.
        // If the entry exists with `has_voted: true`, the filter does not match,
        // the upsert tries to insert a second entry for the user, and the unique
        // index rejects it.
        let filter = doc! {
            "user_id": user_id,
            "has_voted": false,
        };
        let update = doc! {
            "$set": {
                "has_voted": true,
                "voted_for": candidate_id,
                "voted_at": now,
                "updated_at": now,
            },
            "$setOnInsert": {
                "created_at": now,
            },
        };
        let options = UpdateOptions::builder().upsert(true).build();
        self.voters
            .update_one_with_session(filter, update, options, session)
            .await
            .map_err(already_voted_or)?;

        self.trip(FaultPoint::AfterLedger)?;

        // Increment the tally.
        let update = doc! {
            "$inc": { "vote_count": 1 },
            "$set": { "updated_at": now },
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let candidate = self
            .candidates
            .find_one_and_update_with_session(candidate_id.as_doc(), update, options, session)
            .await?
            // Removed since the advisory check.
            .ok_or_else(|| Error::not_found("Candidate"))?;

        self.trip(FaultPoint::BeforeCommit)?;

        Ok(candidate)
    }

    #[cfg(test)]
    fn trip(&self, point: FaultPoint) -> Result<()> {
        if self.fault == Some(point) {
            Err(Error::Internal(format!("Injected storage fault at {point:?}")))
        } else {
            Ok(())
        }
    }

    #[cfg(not(test))]
    #[inline(always)]
    fn trip(&self, _point: FaultPoint) -> Result<()> {
        Ok(())
    }
}

/// Map a duplicate key error on the ledger to [`Error::AlreadyVoted`].
fn already_voted_or(e: DbError) -> Error {
    if is_duplicate_key_error(&e) {
        Error::AlreadyVoted
    } else {
        e.into()
    }
}
