use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{common::role::Role, mongodb::Id};

/// Core user data, as stored in the database.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCore {
    pub name: String,
    /// Unique, trimmed and lower-cased.
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl UserCore {
    /// Check whether the given password is correct.
    pub fn verify_password<T: AsRef<[u8]>>(&self, password: T) -> bool {
        // A malformed hash can only come from outside this server; treat it as a mismatch.
        argon2::verify_encoded(&self.password_hash, password.as_ref()).unwrap_or(false)
    }
}

/// A user without an ID.
pub type NewUser = UserCore;

/// A user from the database, with its unique ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub user: UserCore,
}

impl Deref for User {
    type Target = UserCore;

    fn deref(&self) -> &Self::Target {
        &self.user
    }
}

impl DerefMut for User {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.user
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl UserCore {
        /// A voter. The hash is a placeholder; tests that log in hash their own.
        pub fn example() -> Self {
            Self {
                name: "Ada Voter".to_string(),
                email: "ada@example.com".to_string(),
                password_hash: String::new(),
                role: Role::Voter,
                created_at: Utc::now(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use argon2::Config;

    use super::*;

    #[test]
    fn verify_password() {
        let password_hash =
            argon2::hash_encoded(b"hunter22", b"0123456789abcdef", &Config::default()).unwrap();
        let user = UserCore {
            password_hash,
            ..UserCore::example()
        };
        assert!(user.verify_password("hunter22"));
        assert!(!user.verify_password("hunter23"));
        assert!(!user.verify_password(""));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        let user = UserCore {
            password_hash: "plaintext".to_string(),
            ..UserCore::example()
        };
        assert!(!user.verify_password("plaintext"));
    }
}
