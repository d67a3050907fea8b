use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use mongodb::bson::{serde_helpers::chrono_datetime_as_bson_datetime, DateTime as BsonDateTime};
use rocket::{
    http::{
        impl_from_uri_param_identity,
        uri::fmt::{Formatter as UriFormatter, Path, UriDisplay},
    },
    request::FromParam,
};
use serde::{Deserialize, Serialize};

use crate::model::session::{Category, VoteToken};

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl<'a> FromParam<'a> for $name {
            type Error = std::convert::Infallible;

            fn from_param(param: &'a str) -> Result<Self, Self::Error> {
                Ok(Self::new(param))
            }
        }

        impl UriDisplay<Path> for $name {
            fn fmt(&self, f: &mut UriFormatter<'_, Path>) -> std::fmt::Result {
                f.write_value(&self.0)
            }
        }

        impl_from_uri_param_identity!([Path] $name);
    };
}

string_id!(PartyId);
string_id!(CandidateId);

/// A political party standing in the election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    #[serde(rename = "_id")]
    pub id: PartyId,
    pub name: String,
    pub symbol: Option<String>,
}

/// A candidate standing for one category in one constituency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: CandidateId,
    pub party_id: PartyId,
    pub name: String,
    pub constituency: String,
    pub category: Category,
}

/// A voter on the electoral roll, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredVoter {
    /// Identifier printed on the voter's QR card.
    pub qr_id: String,
    pub full_name: String,
    pub father_name: String,
    pub date_of_birth: Option<String>,
    pub gender: String,
    pub address: String,
    pub has_voted: bool,
    /// The voting token issued to this voter, if any.
    pub token: Option<VoteToken>,
    pub verified_at: Option<BsonDateTime>,
    pub voted_at: Option<BsonDateTime>,
    #[serde(with = "chrono_datetime_as_bson_datetime", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Registration details safe to show on the kiosk. Never includes the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterInfo {
    pub qr_id: String,
    pub full_name: String,
    pub father_name: String,
    pub date_of_birth: Option<String>,
    pub gender: String,
    pub address: String,
    pub has_voted: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub voted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<RegisteredVoter> for VoterInfo {
    fn from(voter: RegisteredVoter) -> Self {
        Self {
            qr_id: voter.qr_id,
            full_name: voter.full_name,
            father_name: voter.father_name,
            date_of_birth: voter.date_of_birth,
            gender: voter.gender,
            address: voter.address,
            has_voted: voter.has_voted,
            verified_at: voter.verified_at.map(BsonDateTime::to_chrono),
            voted_at: voter.voted_at.map(BsonDateTime::to_chrono),
            created_at: voter.created_at,
        }
    }
}

/// Example data for tests.
#[cfg(test)]
pub(crate) mod examples {
    use super::*;

    impl Party {
        pub fn example_green() -> Self {
            Self {
                id: PartyId::new("p-green"),
                name: "Green Alliance".to_string(),
                symbol: Some("tree".to_string()),
            }
        }

        pub fn example_blue() -> Self {
            Self {
                id: PartyId::new("p-blue"),
                name: "Blue Front".to_string(),
                symbol: None,
            }
        }
    }

    impl Candidate {
        /// Four candidates, one per (party, category) pair.
        pub fn examples() -> Vec<Self> {
            vec![
                Self::example("cand-1", "p-green", "Ayesha Khan", "NA-1", "MNA"),
                Self::example("cand-2", "p-green", "Bilal Ahmed", "PP-1", "MPA"),
                Self::example("cand-3", "p-blue", "Sana Malik", "NA-2", "MNA"),
                Self::example("cand-4", "p-blue", "Usman Raza", "PP-2", "MPA"),
            ]
        }

        fn example(id: &str, party: &str, name: &str, constituency: &str, category: &str) -> Self {
            Self {
                id: CandidateId::new(id),
                party_id: PartyId::new(party),
                name: name.to_string(),
                constituency: constituency.to_string(),
                category: Category::new(category),
            }
        }
    }

    impl RegisteredVoter {
        /// A voter who has not yet been issued a token.
        pub fn example() -> Self {
            Self {
                qr_id: "QR-1001".to_string(),
                full_name: "Hina Tariq".to_string(),
                father_name: "Tariq Mehmood".to_string(),
                date_of_birth: Some("1990-04-12".to_string()),
                gender: "F".to_string(),
                address: "12 Canal Road, Lahore".to_string(),
                has_voted: false,
                token: None,
                verified_at: None,
                voted_at: None,
                created_at: Utc::now(),
            }
        }

        /// A voter who has already voted with token `USED99`.
        pub fn example_voted() -> Self {
            Self {
                qr_id: "QR-2002".to_string(),
                full_name: "Kamran Ali".to_string(),
                father_name: "Ali Hassan".to_string(),
                date_of_birth: None,
                gender: "M".to_string(),
                address: "7 Mall Road, Lahore".to_string(),
                has_voted: true,
                token: Some(VoteToken::example_used()),
                verified_at: Some(BsonDateTime::now()),
                voted_at: Some(BsonDateTime::now()),
                created_at: Utc::now(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voter_info_hides_token() {
        let info = VoterInfo::from(RegisteredVoter::example_voted());
        let json = rocket::serde::json::to_string(&info).unwrap();
        assert!(!json.contains("USED99"));
        assert!(info.has_voted);
        assert!(info.voted_at.is_some());
    }

    #[test]
    fn candidate_becomes_choice() {
        let candidate = Candidate::examples().remove(2);
        let choice = crate::model::session::Choice::from(candidate);
        assert_eq!(choice.category, Category::new("MNA"));
        assert_eq!(choice.candidate, CandidateId::new("cand-3"));
        assert_eq!(choice.constituency, "NA-2");
    }
}
