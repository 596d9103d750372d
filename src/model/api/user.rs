use argon2::Config;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    common::role::Role,
    db::user::{NewUser, User},
    mongodb::{id_hex, Id},
};

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// A registration request. These are never stored directly, since the
/// password is in plaintext.
///
/// Every field is optional at the parsing stage so that a missing field is
/// reported as a validation failure rather than a body that fails to parse.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Registration {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl TryFrom<Registration> for NewUser {
    type Error = Error;

    /// Convert a [`Registration`] into a new [`User`] by hashing the password.
    /// This enforces that every field is present, the role is known, and the
    /// password meets the minimum length.
    fn try_from(registration: Registration) -> Result<Self> {
        let (name, email, password, role) = match (
            required(registration.name),
            required(registration.email),
            registration.password.filter(|p| !p.is_empty()),
            required(registration.role),
        ) {
            (Some(name), Some(email), Some(password), Some(role)) => (name, email, password, role),
            _ => return Err(Error::bad_request("All fields are required")),
        };

        let role: Role = role.parse().map_err(|_| {
            Error::bad_request("Invalid role. Must be voter, candidate, or admin")
        })?;
        let email = normalize_email(&email);
        if !email.contains('@') {
            return Err(Error::bad_request("Invalid email address"));
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(Error::bad_request(format!(
                "Password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }

        // 16 bytes is recommended for password hashing:
        //  https://en.wikipedia.org/wiki/Argon2
        let mut salt = [0_u8; 16];
        rand::thread_rng().fill(&mut salt);
        let password_hash = argon2::hash_encoded(password.as_bytes(), &salt, &Config::default())?;

        Ok(Self {
            name,
            email,
            password_hash,
            role,
            created_at: Utc::now(),
        })
    }
}

/// Login credentials.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Credentials {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Credentials {
    /// Split into a normalized email and the password, if both are present.
    pub fn into_parts(self) -> Result<(String, String)> {
        match (required(self.email), self.password.filter(|p| !p.is_empty())) {
            (Some(email), Some(password)) => Ok((normalize_email(&email), password)),
            _ => Err(Error::bad_request("Email and password are required")),
        }
    }
}

/// Emails are compared case-insensitively, so they are stored lower-cased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Trim a string field, treating blank as absent.
pub(crate) fn required(field: Option<String>) -> Option<String> {
    field
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// A user, as shown to clients. Never includes the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDescription {
    #[serde(with = "id_hex")]
    pub id: Id,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserDescription {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.user.name,
            email: user.user.email,
            role: user.user.role,
            created_at: user.user.created_at,
        }
    }
}

/// Response to a successful registration or login.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub message: String,
    pub user: UserDescription,
    pub token: String,
}

#[cfg(test)]
mod examples {
    use super::*;

    impl Registration {
        pub fn example(role: Role) -> Self {
            Self {
                name: Some(format!("Example {role}")),
                email: Some(format!("{role}@example.com")),
                password: Some("correct horse battery staple".to_string()),
                role: Some(role.to_string()),
            }
        }

        pub fn example_named(name: &str, email: &str, role: Role) -> Self {
            Self {
                name: Some(name.to_string()),
                email: Some(email.to_string()),
                ..Self::example(role)
            }
        }
    }

    impl Credentials {
        pub fn for_registration(registration: &Registration) -> Self {
            Self {
                email: registration.email.clone(),
                password: registration.password.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(registration: Registration) -> Option<rocket::http::Status> {
        NewUser::try_from(registration).err().map(|e| e.status())
    }

    #[test]
    fn valid_registration_hashes_password() {
        let registration = Registration::example_named(" Ada ", " Ada@Example.COM ", Role::Voter);
        let user = NewUser::try_from(registration).unwrap();
        assert_eq!(user.name, "Ada");
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.role, Role::Voter);
        assert_ne!(user.password_hash, "correct horse battery staple");
        assert!(user.verify_password("correct horse battery staple"));
    }

    #[test]
    fn missing_fields_rejected() {
        let bad = rocket::http::Status::BadRequest;
        assert_eq!(status_of(Registration::default()), Some(bad));
        assert_eq!(
            status_of(Registration {
                name: Some("   ".to_string()),
                ..Registration::example(Role::Voter)
            }),
            Some(bad)
        );
        assert_eq!(
            status_of(Registration {
                password: None,
                ..Registration::example(Role::Voter)
            }),
            Some(bad)
        );
    }

    #[test]
    fn invalid_role_rejected() {
        let err = NewUser::try_from(Registration {
            role: Some("superuser".to_string()),
            ..Registration::example(Role::Voter)
        })
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid role. Must be voter, candidate, or admin"
        );
    }

    #[test]
    fn short_password_rejected() {
        let err = NewUser::try_from(Registration {
            password: Some("short".to_string()),
            ..Registration::example(Role::Candidate)
        })
        .unwrap_err();
        assert_eq!(err.status(), rocket::http::Status::BadRequest);
    }

    #[test]
    fn credentials_need_both_fields() {
        assert!(Credentials::default().into_parts().is_err());
        let (email, password) = Credentials {
            email: Some(" X@Y.org".to_string()),
            password: Some("pw".to_string()),
        }
        .into_parts()
        .unwrap();
        assert_eq!(email, "x@y.org");
        assert_eq!(password, "pw");
    }

    #[test]
    fn description_hides_hash() {
        let user = User {
            id: Id::new(),
            user: NewUser::example(),
        };
        let json = rocket::serde::json::serde_json::to_value(UserDescription::from(user)).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "voter");
        assert!(json["createdAt"].is_string());
    }
}
