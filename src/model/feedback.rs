use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use sha2::Sha256;
use thiserror::Error;

use crate::{config::Config, model::session::VoteToken};

type HmacSha256 = Hmac<Sha256>;

/// Length of the anonymous feedback session identifier.
const FEEDBACK_SESSION_ID_LEN: usize = 16;

/// Star rating from one to five.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Rating {
    One = 1,
    Two = 2,
    Three = 3,
    Four = 4,
    Five = 5,
}

impl TryFrom<u8> for Rating {
    type Error = FeedbackError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::One,
            2 => Self::Two,
            3 => Self::Three,
            4 => Self::Four,
            5 => Self::Five,
            other => return Err(FeedbackError::RatingOutOfRange(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedbackError {
    #[error("Please give a rating or write a comment")]
    Empty,
    #[error("Rating must be between 1 and 5, not {0}")]
    RatingOutOfRange(u8),
}

/// Feedback as submitted by the kiosk.
#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(test, derive(Serialize))]
pub struct FeedbackRequest {
    pub rating: Option<u8>,
    #[serde(default)]
    pub text: String,
}

/// Stored feedback. Linked to a session only through an HMAC of the
/// token, so it cannot be tied back to a vote without the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub session_id: String,
    pub rating: Option<Rating>,
    pub text: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl Feedback {
    pub fn new(
        token: &VoteToken,
        request: FeedbackRequest,
        config: &Config,
    ) -> Result<Self, FeedbackError> {
        let rating = request.rating.map(Rating::try_from).transpose()?;
        let text = request.text.trim().to_string();
        if rating.is_none() && text.is_empty() {
            return Err(FeedbackError::Empty);
        }

        Ok(Self {
            session_id: feedback_session_id(token, config),
            rating,
            text,
            created_at: Utc::now(),
        })
    }
}

fn feedback_session_id(token: &VoteToken, config: &Config) -> String {
    let mut hmac = HmacSha256::new_from_slice(config.hmac_secret())
        .expect("HMAC can take key of any size");
    hmac.update(token.as_str().as_bytes());
    let mut id = HEXLOWER.encode(&hmac.finalize().into_bytes());
    id.truncate(FEEDBACK_SESSION_ID_LEN);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(rating: Option<u8>, text: &str) -> FeedbackRequest {
        FeedbackRequest {
            rating,
            text: text.to_string(),
        }
    }

    #[test]
    fn rating_or_text_required() {
        let config = Config::example();
        let token = VoteToken::example();

        assert_eq!(
            Feedback::new(&token, request(None, "  "), &config),
            Err(FeedbackError::Empty)
        );

        let rated = Feedback::new(&token, request(Some(4), ""), &config).unwrap();
        assert_eq!(rated.rating, Some(Rating::Four));
        assert!(rated.text.is_empty());

        let commented = Feedback::new(&token, request(None, " Quick and easy "), &config).unwrap();
        assert_eq!(commented.rating, None);
        assert_eq!(commented.text, "Quick and easy");
    }

    #[test]
    fn rating_range_enforced() {
        let config = Config::example();
        let token = VoteToken::example();
        for bad in [0, 6, 255] {
            assert_eq!(
                Feedback::new(&token, request(Some(bad), "hi"), &config),
                Err(FeedbackError::RatingOutOfRange(bad))
            );
        }
    }

    #[test]
    fn session_id_is_stable_and_hides_token() {
        let config = Config::example();
        let first = Feedback::new(&VoteToken::example(), request(Some(5), ""), &config).unwrap();
        let second = Feedback::new(&VoteToken::example(), request(Some(1), ""), &config).unwrap();
        let other = Feedback::new(&VoteToken::example_used(), request(Some(5), ""), &config).unwrap();

        assert_eq!(first.session_id, second.session_id);
        assert_ne!(first.session_id, other.session_id);
        assert_eq!(first.session_id.len(), FEEDBACK_SESSION_ID_LEN);
        assert!(!first.session_id.contains("ABC123"));
    }
}
