use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    db::{candidate::Candidate, voter::Voter},
    mongodb::{id_hex, Id},
};

/// A request to cast a vote.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    #[serde(default)]
    pub candidate_id: Option<String>,
}

/// Confirmation of a successful vote, naming the candidate voted for.
#[derive(Debug, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub message: String,
    pub candidate: String,
}

/// The candidate a voter chose, as shown in their status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotedFor {
    #[serde(with = "id_hex")]
    pub id: Id,
    pub name: String,
    pub party: String,
}

impl From<Candidate> for VotedFor {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id,
            name: candidate.candidate.name,
            party: candidate.candidate.party,
        }
    }
}

/// Whether, when and for whom a user has voted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterStatus {
    pub has_voted: bool,
    pub voted_for: Option<VotedFor>,
    pub voted_at: Option<DateTime<Utc>>,
}

impl VoterStatus {
    /// The status of a ledger entry, given the candidate it refers to if that still exists.
    pub fn new(voter: &Voter, voted_for: Option<Candidate>) -> Self {
        Self {
            has_voted: voter.has_voted,
            voted_for: voted_for.map(Into::into),
            voted_at: voter.voted_at(),
        }
    }
}
