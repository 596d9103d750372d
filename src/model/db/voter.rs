use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::{self, serde_helpers::chrono_datetime_as_bson_datetime};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Core voter ledger data, as stored in the database.
///
/// Once `has_voted` is set it is never cleared, and `voted_for` never changes.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterCore {
    /// The user this entry belongs to. Unique across the collection.
    pub user_id: Id,
    pub has_voted: bool,
    #[serde(default)]
    pub voted_for: Option<Id>,
    #[serde(default)]
    pub voted_at: Option<bson::DateTime>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl VoterCore {
    /// Create a ledger entry for a user who has not voted.
    pub fn new(user_id: Id) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            has_voted: false,
            voted_for: None,
            voted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// When the vote was cast, if it has been.
    pub fn voted_at(&self) -> Option<DateTime<Utc>> {
        self.voted_at.map(bson::DateTime::to_chrono)
    }
}

/// A voter without an ID.
pub type NewVoter = VoterCore;

/// A voter ledger entry from the database, with its unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct Voter {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub voter: VoterCore,
}

impl Deref for Voter {
    type Target = VoterCore;

    fn deref(&self) -> &Self::Target {
        &self.voter
    }
}

impl DerefMut for Voter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.voter
    }
}
