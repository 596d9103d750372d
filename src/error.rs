use argon2::Error as Argon2Error;
use jsonwebtoken::errors::Error as JwtError;
use mongodb::{bson::oid::Error as OidError, error::Error as DbError};
use rocket::{
    http::Status,
    response::{self, Responder},
    serde::json::{serde_json::json, Json},
    Request,
};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Message shown for every server-side failure; the details only go to the log.
const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Argon2(#[from] Argon2Error),
    #[error("Malformed ID: {0}")]
    OidParse(#[from] OidError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("You have already voted")]
    AlreadyVoted,
    #[error("{0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// The HTTP status this error is reported with.
    pub fn status(&self) -> Status {
        match self {
            Self::BadRequest(_) | Self::OidParse(_) | Self::AlreadyVoted => Status::BadRequest,
            Self::Unauthorized(_) => Status::Unauthorized,
            Self::Forbidden(_) => Status::Forbidden,
            Self::NotFound(_) => Status::NotFound,
            Self::Conflict(_) => Status::Conflict,
            Self::Db(_) | Self::Jwt(_) | Self::Argon2(_) | Self::Internal(_) => {
                Status::InternalServerError
            }
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        let message = if status == Status::InternalServerError {
            error!("{self}");
            INTERNAL_ERROR_MESSAGE.to_string()
        } else {
            debug!("Rejecting request: {self}");
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).respond_to(req)
    }
}

/// Catch every error that Rocket raises itself (failed guards, unknown
/// routes, unparseable bodies) and give it the same `{"error": ...}` shape.
#[catch(default)]
pub fn default_catcher(status: Status, _req: &Request<'_>) -> (Status, Json<rocket::serde::json::Value>) {
    let (status, message) = match status.code {
        400 => (status, "Bad request"),
        401 => (status, "Authentication required"),
        403 => (status, "Access denied"),
        404 => (status, "Not found"),
        // Bodies that parse as JSON but have the wrong shape.
        422 => (Status::BadRequest, "Malformed request body"),
        500..=599 => (status, INTERNAL_ERROR_MESSAGE),
        _ => (status, status.reason().unwrap_or("Error")),
    };
    (status, Json(json!({ "error": message })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_statuses() {
        assert_eq!(Error::bad_request("x").status(), Status::BadRequest);
        assert_eq!(Error::Unauthorized("x".into()).status(), Status::Unauthorized);
        assert_eq!(Error::forbidden("x").status(), Status::Forbidden);
        assert_eq!(Error::not_found("x").status(), Status::NotFound);
        assert_eq!(Error::conflict("x").status(), Status::Conflict);
        assert_eq!(Error::AlreadyVoted.status(), Status::BadRequest);
        assert_eq!(
            Error::Internal("disk on fire".into()).status(),
            Status::InternalServerError
        );
        assert_eq!(
            Error::from("nope".parse::<mongodb::bson::oid::ObjectId>().unwrap_err()).status(),
            Status::BadRequest
        );
    }

    #[test]
    fn messages() {
        assert_eq!(Error::AlreadyVoted.to_string(), "You have already voted");
        assert_eq!(Error::not_found("Candidate").to_string(), "Candidate not found");
    }
}
