use std::fmt::Display;

use jsonwebtoken::errors::Error as JwtError;
use mongodb::error::Error as DbError;
use reqwest::Error as GatewayError;
use rocket::{
    http::Status,
    response::{status::Custom, Responder},
    serde::json::Json,
    Request,
};
use serde::Serialize;
use thiserror::Error;

use crate::{logging::RequestId, model::session::TransitionError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Verification failed: {0}")]
    Verification(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

/// The kinds of failure a voter can be told about.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Missing or malformed input. Nothing changed.
    Validation,
    /// Identity, face or token was rejected.
    Verification,
    /// The token has already been used to vote.
    Conflict,
    /// Network or server trouble; the same action can be retried.
    Transient,
    /// The action is not valid at this point of the session.
    Invariant,
}

impl Error {
    pub fn not_found(what: impl Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn bad_request(msg: impl Display) -> Self {
        Self::BadRequest(msg.to_string())
    }

    /// The error behind a bare status, for requests that failed before
    /// reaching a handler.
    pub fn from_status(status: Status) -> Self {
        match status.code {
            401 => Self::Unauthorized(
                "This kiosk session has expired. Please start again.".to_string(),
            ),
            404 => Self::not_found("No such resource"),
            400..=499 => Self::bad_request(format!("The request was not understood ({status})")),
            _ => Self::Unavailable(format!(
                "the server could not complete the request ({status})"
            )),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::BadRequest(_) | Self::NotFound(_) | Self::Unauthorized(_) | Self::Jwt(_) => {
                ErrorCategory::Validation
            }
            Self::Verification(_) => ErrorCategory::Verification,
            Self::Conflict(_) => ErrorCategory::Conflict,
            Self::Db(_) | Self::Gateway(_) | Self::Unavailable(_) => ErrorCategory::Transient,
            Self::Transition(err) if err.is_validation() => ErrorCategory::Validation,
            Self::Transition(_) => ErrorCategory::Invariant,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::BadRequest(_) => Status::BadRequest,
            Self::NotFound(_) => Status::NotFound,
            Self::Unauthorized(_) | Self::Jwt(_) => Status::Unauthorized,
            Self::Verification(_) => Status::Forbidden,
            Self::Conflict(_) => Status::Conflict,
            Self::Db(_) => Status::InternalServerError,
            Self::Gateway(_) | Self::Unavailable(_) => Status::ServiceUnavailable,
            Self::Transition(err) if err.is_validation() => Status::BadRequest,
            Self::Transition(_) => Status::UnprocessableEntity,
        }
    }

    /// Is repeating the same action worthwhile?
    pub fn retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::Verification
        )
    }

    /// A plain-language description for display on the kiosk.
    pub fn user_message(&self) -> String {
        match self.category() {
            ErrorCategory::Validation => {
                format!("Please check your input and try again. {}", self.detail())
            }
            ErrorCategory::Verification => {
                format!("We could not verify you. {}", self.detail())
            }
            ErrorCategory::Conflict => format!(
                "{} This token cannot be used again, so retrying will not help.",
                self.detail()
            ),
            ErrorCategory::Transient => format!(
                "A temporary problem occurred ({}). Please try again.",
                self.detail()
            ),
            ErrorCategory::Invariant => {
                format!("That action is not available right now. {}", self.detail())
            }
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::BadRequest(msg)
            | Self::NotFound(msg)
            | Self::Unauthorized(msg)
            | Self::Verification(msg)
            | Self::Conflict(msg)
            | Self::Unavailable(msg) => msg.clone(),
            Self::Db(_) => "the vote database could not be reached".to_string(),
            Self::Gateway(_) => "the verification service could not be reached".to_string(),
            Self::Jwt(_) => "the kiosk session has expired".to_string(),
            Self::Transition(err) => err.to_string(),
        }
    }
}

/// Body of every error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    category: ErrorCategory,
    message: String,
    retryable: bool,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        let id = RequestId::of(req);
        if status.code >= 500 {
            error!("req{id}: {self}");
        } else {
            debug!("req{id}: {self}");
        }
        let body = ErrorBody {
            category: self.category(),
            message: self.user_message(),
            retryable: self.retryable(),
        };
        Custom(status, Json(body)).respond_to(req)
    }
}
