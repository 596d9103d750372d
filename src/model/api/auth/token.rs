use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, TokenData, Validation};
use rocket::{
    http::Status,
    request::{FromRequest, Outcome},
    Request, State,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    common::role::Role,
    db::user::User,
    mongodb::{id_hex, Id},
};

pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const BEARER_PREFIX: &str = "Bearer ";

/// An authentication token representing a specific user with a specific role.
///
/// As a request guard, this fails with `401 Unauthorized` unless the request
/// carries a valid, unexpired bearer token signed with our secret. Role checks
/// are left to each endpoint, via [`AuthToken::require`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    #[serde(with = "id_hex")]
    pub id: Id,
    pub email: String,
    pub role: Role,
    pub name: String,
}

impl AuthToken {
    /// Create a new [`AuthToken`] for the given user.
    pub fn new(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
            name: user.name.clone(),
        }
    }

    /// Does this token carry one of the `accepted` roles?
    pub fn permits(&self, accepted: &[Role]) -> bool {
        self.role.is_any_of(accepted)
    }

    /// As [`AuthToken::permits`], failing with `403 Forbidden` and the given message.
    pub fn require(&self, accepted: &[Role], message: &str) -> Result<()> {
        if self.permits(accepted) {
            Ok(())
        } else {
            Err(Error::forbidden(message))
        }
    }

    /// Sign this token, valid for the configured lifetime from now.
    pub fn encode(self, config: &Config) -> Result<String> {
        let issued_at = Utc::now();
        let claims = Claims {
            token: self,
            issued_at,
            expire_at: issued_at + config.auth_ttl(),
        };
        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret()),
        )?;
        Ok(token)
    }

    /// Verify a signed token, checking its signature and expiry.
    pub fn decode(token: &str, config: &Config) -> Result<Self> {
        let token = jsonwebtoken::decode(
            token,
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )
        .map(|claims: TokenData<Claims>| claims.claims.token)?;
        Ok(token)
    }

    /// Extract and verify the bearer token from a request, if there is a valid one.
    pub fn from_headers(req: &Request<'_>, config: &Config) -> Option<Self> {
        let header = req.headers().get_one(AUTHORIZATION_HEADER)?;
        let token = header.strip_prefix(BEARER_PREFIX)?.trim();
        match Self::decode(token, config) {
            Ok(token) => Some(token),
            Err(e) => {
                debug!("Rejected bearer token: {e}");
                None
            }
        }
    }
}

/// Token claims: the token itself plus issue and expiry datetimes.
#[derive(Serialize, Deserialize)]
struct Claims {
    #[serde(flatten)]
    token: AuthToken,
    #[serde(rename = "iat", with = "ts_seconds")]
    issued_at: DateTime<Utc>,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthToken {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        // Unwrap is safe as `Config` is always managed.
        let config = req.guard::<&State<Config>>().await.unwrap();

        // Cached so the request logger can attribute the response.
        match req.local_cache(|| Self::from_headers(req, config)) {
            Some(token) => Outcome::Success(token.clone()),
            None => Outcome::Failure((
                Status::Unauthorized,
                Error::Unauthorized("Authentication required".to_string()),
            )),
        }
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl AuthToken {
        pub fn example(role: Role) -> Self {
            Self {
                id: Id::new(),
                email: format!("{role}@example.com"),
                role,
                name: format!("Example {role}"),
            }
        }
    }
}
