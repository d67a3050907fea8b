use chrono::{serde::ts_seconds, DateTime, Utc};
use jsonwebtoken::{errors::Error as JwtError, DecodingKey, EncodingKey, Header, Validation};
use rocket::{
    http::{Cookie, SameSite, Status},
    outcome::{try_outcome, IntoOutcome},
    request::{self, FromRequest},
    Request, State,
};
use serde::{Deserialize, Serialize};

use crate::config::Config;

use super::SessionId;

pub const SESSION_COOKIE: &str = "kiosk_session";

/// Binds a browser tab to its kiosk session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookie {
    #[serde(rename = "sid")]
    id: SessionId,
}

impl SessionCookie {
    pub fn new(id: SessionId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Serialize this session into a signed cookie.
    pub fn into_cookie(self, config: &Config) -> Cookie<'static> {
        let claims = Claims {
            session: self,
            expire_at: Utc::now() + config.session_ttl(),
        };

        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.jwt_secret()),
        )
        .unwrap(); // Infallible.

        Cookie::build(SESSION_COOKIE, token)
            .max_age(time::Duration::seconds(config.session_ttl().num_seconds()))
            .http_only(true)
            .same_site(SameSite::Strict)
            .finish()
    }

    /// Deserialize a session from a cookie.
    pub fn from_cookie(cookie: &Cookie<'_>, config: &Config) -> Result<Self, JwtError> {
        jsonwebtoken::decode::<Claims>(
            cookie.value(),
            &DecodingKey::from_secret(config.jwt_secret()),
            &Validation::default(),
        )
        .map(|data| data.claims.session)
    }
}

/// Cookie claims: the session plus an expiry datetime.
#[derive(Serialize, Deserialize)]
struct Claims {
    #[serde(flatten)]
    session: SessionCookie,
    #[serde(rename = "exp", with = "ts_seconds")]
    expire_at: DateTime<Utc>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SessionCookie {
    type Error = JwtError;

    /// Get the session from the cookie. A missing or invalid cookie is
    /// unauthorized.
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let config = req.guard::<&State<Config>>().await.unwrap(); // Valid as `Config` is always managed

        let cookie = try_outcome!(req
            .cookies()
            .get(SESSION_COOKIE)
            .ok_or_else(|| JwtError::from(jsonwebtoken::errors::ErrorKind::InvalidToken))
            .into_outcome(Status::Unauthorized));
        Self::from_cookie(cookie, config).into_outcome(Status::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_round_trip() {
        let config = Config::example();
        let session = SessionCookie::new(SessionId::random());
        let cookie = session.into_cookie(&config);

        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(SessionCookie::from_cookie(&cookie, &config).unwrap(), session);
    }

    #[test]
    fn tampered_cookie_rejected() {
        let config = Config::example();
        let cookie = SessionCookie::new(SessionId::random()).into_cookie(&config);
        let forged = Cookie::new(SESSION_COOKIE, format!("{}x", cookie.value()));
        assert!(SessionCookie::from_cookie(&forged, &config).is_err());
    }
}
