use std::fmt::{Display, Formatter};
use std::str::FromStr;

use data_encoding::BASE64URL_NOPAD;
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An opaque credential entitling its holder to cast exactly one vote.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VoteToken(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Token must not be empty")]
pub struct EmptyToken;

impl VoteToken {
    /// Mint a fresh URL-safe token from `entropy_bytes` random bytes.
    pub fn mint(mut rng: impl RngCore + CryptoRng, entropy_bytes: usize) -> Self {
        let mut bytes = vec![0; entropy_bytes.max(1)];
        rng.fill_bytes(&mut bytes);
        Self(BASE64URL_NOPAD.encode(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for VoteToken {
    type Err = EmptyToken;

    /// Surrounding whitespace from kiosk input is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(EmptyToken);
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for VoteToken {
    type Error = EmptyToken;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<VoteToken> for String {
    fn from(token: VoteToken) -> Self {
        token.0
    }
}

impl Display for VoteToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one kiosk session (one browser tab).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub fn random() -> Self {
        Self(rand::thread_rng().gen())
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl VoteToken {
        pub fn example() -> Self {
            "ABC123".parse().unwrap()
        }

        pub fn example_used() -> Self {
            "USED99".parse().unwrap()
        }

        pub fn example_unknown() -> Self {
            "NOPE00".parse().unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    #[test]
    fn parsing_trims_and_rejects_blank() {
        assert_eq!(" ABC123 \n".parse::<VoteToken>(), Ok(VoteToken::example()));
        assert_eq!("".parse::<VoteToken>(), Err(EmptyToken));
        assert_eq!("   ".parse::<VoteToken>(), Err(EmptyToken));
    }

    #[test]
    fn minted_tokens_are_url_safe_and_distinct() {
        let a = VoteToken::mint(OsRng, 32);
        let b = VoteToken::mint(OsRng, 32);
        assert_ne!(a, b);
        // 32 bytes of entropy encode to 43 unpadded base64 characters.
        assert_eq!(a.as_str().len(), 43);
        assert!(a
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn deserialization_validates() {
        let token: VoteToken = rocket::serde::json::from_str("\"  XYZ \"").unwrap();
        assert_eq!(token.as_str(), "XYZ");
        assert!(rocket::serde::json::from_str::<VoteToken>("\"\"").is_err());
    }
}
