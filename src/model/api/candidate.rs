use chrono::{DateTime, Utc};
use mongodb::bson::Document;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    api::user::required,
    db::candidate::{Candidate, MAX_CAMPAIGN_MESSAGE_LENGTH},
    mongodb::{id_hex, option_id_hex, Id},
};

/// A request to add a candidate.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub party: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Must be the caller's own ID when a candidate applies for themselves.
    #[serde(default)]
    pub user_id: Option<String>,
}

/// A validated [`CandidateSpec`].
#[derive(Debug, PartialEq, Eq)]
pub struct ValidCandidateSpec {
    pub name: String,
    pub party: String,
    pub image_url: Option<String>,
    pub user_id: Option<String>,
}

impl CandidateSpec {
    /// Check the required fields are present, trimming them.
    pub fn validate(self) -> Result<ValidCandidateSpec> {
        match (required(self.name), required(self.party)) {
            (Some(name), Some(party)) => Ok(ValidCandidateSpec {
                name,
                party,
                image_url: required(self.image_url),
                user_id: required(self.user_id),
            }),
            _ => Err(Error::bad_request("Name and party are required")),
        }
    }
}

/// A request to edit a candidate profile. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePatch {
    #[serde(default)]
    pub party: Option<String>,
    #[serde(default)]
    pub campaign_message: Option<String>,
}

impl CandidatePatch {
    /// Build the `$set` contents for this patch, validating as we go.
    pub fn to_set_doc(&self) -> Result<Document> {
        let mut set = Document::new();
        if let Some(party) = required(self.party.clone()) {
            set.insert("party", party);
        }
        if let Some(message) = &self.campaign_message {
            let message = message.trim();
            if message.chars().count() > MAX_CAMPAIGN_MESSAGE_LENGTH {
                return Err(Error::bad_request(format!(
                    "Campaign message cannot exceed {MAX_CAMPAIGN_MESSAGE_LENGTH} characters"
                )));
            }
            set.insert("campaign_message", message);
        }
        Ok(set)
    }
}

/// A candidate, as shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateDescription {
    #[serde(with = "id_hex")]
    pub id: Id,
    pub name: String,
    pub party: String,
    pub image_url: String,
    pub campaign_message: String,
    pub vote_count: i64,
    #[serde(with = "option_id_hex")]
    pub user_id: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Candidate> for CandidateDescription {
    fn from(candidate: Candidate) -> Self {
        let core = candidate.candidate;
        Self {
            id: candidate.id,
            name: core.name,
            party: core.party,
            image_url: core.image_url,
            campaign_message: core.campaign_message,
            vote_count: core.vote_count,
            user_id: core.user_id,
            created_at: core.created_at,
            updated_at: core.updated_at,
        }
    }
}

/// The public leaderboard.
#[derive(Debug, Serialize, Deserialize)]
pub struct CandidateList {
    pub candidates: Vec<CandidateDescription>,
}

/// Response to a change to a single candidate.
#[derive(Debug, Serialize, Deserialize)]
pub struct CandidateResponse {
    pub message: String,
    pub candidate: CandidateDescription,
}

impl CandidateResponse {
    pub fn new(message: &str, candidate: impl Into<CandidateDescription>) -> Self {
        Self {
            message: message.to_string(),
            candidate: candidate.into(),
        }
    }
}

#[cfg(test)]
mod examples {
    use super::*;

    impl CandidateSpec {
        pub fn example() -> Self {
            Self {
                name: Some("Jane Doe".to_string()),
                party: Some("Indep".to_string()),
                image_url: None,
                user_id: None,
            }
        }

        pub fn example2() -> Self {
            Self {
                name: Some("John Roe".to_string()),
                party: Some("Green".to_string()),
                image_url: Some("https://example.com/roe.png".to_string()),
                user_id: None,
            }
        }
    }
}
