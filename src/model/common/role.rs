use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// The role of a user, fixed at registration.
///
/// There is no hierarchy between roles: every endpoint lists the roles it
/// accepts, and an admin is not implicitly a voter.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Voter,
    Candidate,
    Admin,
}

impl Role {
    /// Is this role one of the `accepted` roles?
    pub fn is_any_of(self, accepted: &[Role]) -> bool {
        accepted.contains(&self)
    }
}

impl Display for Role {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}",
            match self {
                Self::Voter => "voter",
                Self::Candidate => "candidate",
                Self::Admin => "admin",
            }
        )
    }
}

/// A role name that is not one of `voter`, `candidate` or `admin`.
#[derive(Debug, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "voter" => Ok(Self::Voter),
            "candidate" => Ok(Self::Candidate),
            "admin" => Ok(Self::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}
