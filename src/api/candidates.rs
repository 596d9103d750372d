use chrono::Utc;
use mongodb::{
    bson::{self, doc},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
};
use rocket::{futures::TryStreamExt, http::Status, serde::json::Json, Route};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            auth::AuthToken,
            candidate::{
                CandidateDescription, CandidateList, CandidatePatch, CandidateResponse,
                CandidateSpec,
            },
        },
        common::role::Role,
        db::candidate::{Candidate, EditAccess, NewCandidate},
        mongodb::{is_duplicate_key_error, Coll, Id},
    },
};

pub fn routes() -> Vec<Route> {
    routes![list_candidates, create_candidate, update_candidate, remove_candidate]
}

const ALREADY_APPLIED: &str = "You have already applied for candidature";
const ALREADY_LISTED: &str = "Candidate with this name and party already exists";

#[get("/candidates")]
async fn list_candidates(candidates: Coll<Candidate>) -> Result<Json<CandidateList>> {
    let options = FindOptions::builder()
        .sort(doc! { "vote_count": -1, "name": 1 })
        .build();
    let candidates: Vec<CandidateDescription> = candidates
        .find(None, options)
        .await?
        .map_ok(Into::into)
        .try_collect()
        .await?;
    Ok(Json(CandidateList { candidates }))
}

#[post("/candidates", data = "<spec>", format = "json")]
async fn create_candidate(
    token: AuthToken,
    spec: Json<CandidateSpec>,
    candidates: Coll<Candidate>,
    new_candidates: Coll<NewCandidate>,
) -> Result<(Status, Json<CandidateResponse>)> {
    let spec = spec.0.validate()?;

    let (new_candidate, message) = match token.role {
        Role::Admin => {
            // Also covers profiles owned by candidate-role users. The partial
            // unique index only spans admin listings, and catches concurrent adds.
            let existing = candidates
                .find_one(doc! { "name": &spec.name, "party": &spec.party }, None)
                .await?;
            if existing.is_some() {
                return Err(Error::conflict(ALREADY_LISTED));
            }
            let candidate = NewCandidate::new(spec.name, spec.party, spec.image_url, None);
            (candidate, "Candidate added successfully")
        }
        Role::Candidate => {
            // Candidates may only apply for themselves.
            let applicant = spec.user_id.as_deref().and_then(|id| id.parse::<Id>().ok());
            if applicant != Some(token.id) {
                return Err(Error::bad_request("Invalid userId for candidate application"));
            }
            if candidates
                .find_one(doc! { "user_id": token.id }, None)
                .await?
                .is_some()
            {
                return Err(Error::conflict(ALREADY_APPLIED));
            }
            let candidate =
                NewCandidate::new(spec.name, spec.party, spec.image_url, Some(token.id));
            (candidate, "Candidature application successful")
        }
        Role::Voter => return Err(Error::forbidden("Not authorized to add candidate")),
    };

    let id: Id = new_candidates
        .insert_one(&new_candidate, None)
        .await
        .map_err(|e| {
            // An admin listing can only collide on `(name, party)`, an
            // application only on `user_id`.
            if !is_duplicate_key_error(&e) {
                e.into()
            } else if new_candidate.admin_listed {
                Error::conflict(ALREADY_LISTED)
            } else {
                Error::conflict(ALREADY_APPLIED)
            }
        })?
        .inserted_id
        .as_object_id()
        .unwrap() // Valid because the ID comes directly from the DB
        .into();
    info!("{} {} added candidate {id}", token.role, token.id);

    let candidate = Candidate {
        id,
        candidate: new_candidate,
    };
    Ok((Status::Created, Json(CandidateResponse::new(message, candidate))))
}

#[put("/candidates/<candidate_id>", data = "<patch>", format = "json")]
async fn update_candidate(
    token: AuthToken,
    candidate_id: Id,
    patch: Json<CandidatePatch>,
    candidates: Coll<Candidate>,
) -> Result<Json<CandidateResponse>> {
    let mut set = patch.to_set_doc()?;

    let candidate = candidates
        .find_one(candidate_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found("Candidate"))?;
    let access = candidate
        .edit_access(&token)
        .ok_or_else(|| Error::forbidden("Not authorized to edit this candidate"))?;

    if access == EditAccess::Claim {
        if candidates
            .find_one(doc! { "user_id": token.id }, None)
            .await?
            .is_some()
        {
            return Err(Error::conflict(ALREADY_APPLIED));
        }
        set.insert("user_id", token.id);
    }
    set.insert("updated_at", bson::DateTime::from_chrono(Utc::now()));

    // The filter restates the access check, so a profile claimed by someone
    // else since it was read no longer matches.
    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();
    let updated = candidates
        .find_one_and_update(
            access.filter(candidate_id, token.id),
            doc! { "$set": set },
            options,
        )
        .await
        .map_err(|e| {
            // Only a claim sets `user_id`. Other edits can only collide by
            // moving an admin listing onto another's party.
            if !is_duplicate_key_error(&e) {
                e.into()
            } else if access == EditAccess::Claim {
                Error::conflict(ALREADY_APPLIED)
            } else {
                Error::conflict(ALREADY_LISTED)
            }
        })?;

    let candidate = match updated {
        Some(candidate) => candidate,
        None => {
            // Lost a race: either removed or claimed by someone else.
            return match candidates.find_one(candidate_id.as_doc(), None).await? {
                Some(_) => Err(Error::forbidden("Not authorized to edit this candidate")),
                None => Err(Error::not_found("Candidate")),
            };
        }
    };
    if access == EditAccess::Claim {
        info!("Candidate {candidate_id} claimed by {}", token.id);
    }

    Ok(Json(CandidateResponse::new(
        "Candidate updated successfully",
        candidate,
    )))
}

#[delete("/candidates/<candidate_id>")]
async fn remove_candidate(
    token: AuthToken,
    candidate_id: Id,
    candidates: Coll<Candidate>,
) -> Result<Json<CandidateResponse>> {
    token.require(&[Role::Admin], "Admin access required")?;

    let candidate = candidates
        .find_one_and_delete(candidate_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found("Candidate"))?;
    // Voter records that reference this candidate are left as they are.
    warn!(
        "Admin {} removed candidate {candidate_id} with {} votes",
        token.id, candidate.vote_count
    );

    Ok(Json(CandidateResponse::new(
        "Candidate removed successfully",
        candidate,
    )))
}
