use mongodb::{bson::doc, Client};
use rocket::{serde::json::Json, Route, State};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            auth::AuthToken,
            voter::{VoteReceipt, VoteRequest, VoterStatus},
        },
        common::role::Role,
        db::{candidate::Candidate, voter::Voter},
        mongodb::{Coll, Id},
        vote::VoteTransaction,
    },
};

pub fn routes() -> Vec<Route> {
    routes![cast_vote, voter_status]
}

#[post("/vote", data = "<request>", format = "json")]
async fn cast_vote(
    token: AuthToken,
    request: Json<VoteRequest>,
    voters: Coll<Voter>,
    candidates: Coll<Candidate>,
    db_client: &State<Client>,
) -> Result<Json<VoteReceipt>> {
    token.require(&[Role::Voter], "Only voters can cast votes")?;

    let candidate_id: Id = request
        .0
        .candidate_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| Error::bad_request("Candidate ID is required"))?
        .trim()
        .parse()?;

    let candidate = VoteTransaction::new(db_client, &voters, &candidates)
        .cast(token.id, candidate_id)
        .await?;
    info!("Voter {} cast a vote for {}", token.id, candidate.id);

    Ok(Json(VoteReceipt {
        message: "Vote cast successfully".to_string(),
        candidate: candidate.candidate.name,
    }))
}

#[get("/voter-status/<user_id>")]
async fn voter_status(
    token: AuthToken,
    user_id: Id,
    voters: Coll<Voter>,
    candidates: Coll<Candidate>,
) -> Result<Json<VoterStatus>> {
    if token.id != user_id && !token.permits(&[Role::Admin]) {
        return Err(Error::forbidden("Unauthorized"));
    }

    let Some(voter) = voters.find_one(doc! { "user_id": user_id }, None).await? else {
        return Ok(Json(VoterStatus::default()));
    };
    // `None` if the candidate has since been removed.
    let voted_for = match voter.voted_for {
        Some(candidate_id) => candidates.find_one(candidate_id.as_doc(), None).await?,
        None => None,
    };

    Ok(Json(VoterStatus::new(&voter, voted_for)))
}
