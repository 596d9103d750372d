use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, serde_helpers::chrono_datetime_as_bson_datetime, Document};
use serde::{Deserialize, Serialize};

use crate::model::{api::auth::AuthToken, common::role::Role, mongodb::Id};

/// Image shown for candidates that have not supplied one.
pub const DEFAULT_IMAGE_URL: &str =
    "https://via.placeholder.com/150x150/3b82f6/ffffff?text=Candidate";

/// Party given to the profile created automatically when a candidate registers.
pub const DEFAULT_PARTY: &str = "Independent";

pub const MAX_CAMPAIGN_MESSAGE_LENGTH: usize = 1000;

/// Core candidate data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCore {
    pub name: String,
    pub party: String,
    pub image_url: String,
    #[serde(default)]
    pub campaign_message: String,
    /// Only ever changed by `$inc: 1` inside a vote transaction.
    pub vote_count: i64,
    /// The candidate-role user owning this profile; absent while unclaimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Id>,
    /// Added by an admin rather than by or for a candidate-role user. These
    /// profiles have unique `(name, party)` pairs.
    #[serde(default)]
    pub admin_listed: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl CandidateCore {
    /// Create a new candidate with no votes. Profiles created without an
    /// owner are admin-listed.
    pub fn new(name: String, party: String, image_url: Option<String>, user_id: Option<Id>) -> Self {
        let now = Utc::now();
        Self {
            name,
            party,
            image_url: image_url.unwrap_or_else(|| DEFAULT_IMAGE_URL.to_string()),
            campaign_message: String::new(),
            vote_count: 0,
            admin_listed: user_id.is_none(),
            user_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Is this profile unclaimed?
    pub fn is_unclaimed(&self) -> bool {
        self.user_id.is_none()
    }
}

/// A candidate without an ID.
pub type NewCandidate = CandidateCore;

/// A candidate from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub candidate: CandidateCore,
}

impl Candidate {
    /// Decide how, if at all, the holder of `token` may edit this profile.
    pub fn edit_access(&self, token: &AuthToken) -> Option<EditAccess> {
        match token.role {
            Role::Admin => Some(EditAccess::Admin),
            Role::Candidate if self.user_id == Some(token.id) => Some(EditAccess::Owner),
            Role::Candidate if self.is_unclaimed() => Some(EditAccess::Claim),
            _ => None,
        }
    }
}

impl Deref for Candidate {
    type Target = CandidateCore;

    fn deref(&self) -> &Self::Target {
        &self.candidate
    }
}

impl DerefMut for Candidate {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.candidate
    }
}

/// The grounds on which a profile edit is permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditAccess {
    /// Admins may edit any profile, without claiming it.
    Admin,
    /// The owning candidate.
    Owner,
    /// A candidate-role user editing an unclaimed profile, which becomes theirs.
    Claim,
}

impl EditAccess {
    /// The filter under which the edit is applied.
    ///
    /// This restates the ownership precondition so that it is re-checked
    /// atomically by the write itself: two users racing to claim the same
    /// profile cannot both succeed.
    pub fn filter(self, candidate_id: Id, editor: Id) -> Document {
        match self {
            Self::Admin => candidate_id.as_doc(),
            Self::Owner => doc! { "_id": candidate_id, "user_id": editor },
            Self::Claim => doc! { "_id": candidate_id, "user_id": { "$exists": false } },
        }
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl CandidateCore {
        pub fn example() -> Self {
            Self::new("Jane Doe".to_string(), "Indep".to_string(), None, None)
        }

        pub fn example2() -> Self {
            Self::new(
                "John Roe".to_string(),
                "Green".to_string(),
                Some("https://example.com/roe.png".to_string()),
                None,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(role: Role) -> AuthToken {
        AuthToken {
            id: Id::new(),
            email: "someone@example.com".to_string(),
            role,
            name: "Someone".to_string(),
        }
    }

    fn candidate(owner: Option<Id>) -> Candidate {
        Candidate {
            id: Id::new(),
            candidate: CandidateCore {
                user_id: owner,
                ..CandidateCore::example()
            },
        }
    }

    #[test]
    fn new_candidate_defaults() {
        let candidate = CandidateCore::example();
        assert_eq!(candidate.vote_count, 0);
        assert_eq!(candidate.image_url, DEFAULT_IMAGE_URL);
        assert!(candidate.campaign_message.is_empty());
        assert!(candidate.is_unclaimed());
        assert!(candidate.admin_listed);
    }

    #[test]
    fn owned_profiles_not_admin_listed() {
        let profile = CandidateCore::new(
            "Jane Doe".to_string(),
            DEFAULT_PARTY.to_string(),
            None,
            Some(Id::new()),
        );
        assert!(!profile.is_unclaimed());
        assert!(!profile.admin_listed);
    }

    #[test]
    fn claimed_admin_listing_is_not_claimable() {
        let claimant = token(Role::Candidate);
        let mut listing = candidate(None);
        assert_eq!(listing.edit_access(&claimant), Some(EditAccess::Claim));

        listing.user_id = Some(Id::new());
        assert!(listing.admin_listed);
        assert_eq!(listing.edit_access(&claimant), None);
    }

    #[test]
    fn admin_edits_anything() {
        let admin = token(Role::Admin);
        assert_eq!(candidate(None).edit_access(&admin), Some(EditAccess::Admin));
        assert_eq!(
            candidate(Some(Id::new())).edit_access(&admin),
            Some(EditAccess::Admin)
        );
    }

    #[test]
    fn candidates_edit_own_or_claim_unclaimed() {
        let owner = token(Role::Candidate);
        let other = token(Role::Candidate);
        let owned = candidate(Some(owner.id));

        assert_eq!(owned.edit_access(&owner), Some(EditAccess::Owner));
        assert_eq!(owned.edit_access(&other), None);
        assert_eq!(candidate(None).edit_access(&other), Some(EditAccess::Claim));
    }

    #[test]
    fn voters_never_edit() {
        let voter = token(Role::Voter);
        assert_eq!(candidate(None).edit_access(&voter), None);
        // Even a voter whose ID somehow matches the owner.
        assert_eq!(candidate(Some(voter.id)).edit_access(&voter), None);
    }

    #[test]
    fn claim_filter_requires_unclaimed() {
        let id = Id::new();
        let editor = Id::new();
        assert_eq!(EditAccess::Admin.filter(id, editor), doc! { "_id": id });
        assert_eq!(
            EditAccess::Owner.filter(id, editor),
            doc! { "_id": id, "user_id": editor }
        );
        assert_eq!(
            EditAccess::Claim.filter(id, editor),
            doc! { "_id": id, "user_id": { "$exists": false } }
        );
    }
}
