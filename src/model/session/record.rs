use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER;
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};
use serde_unit_struct::{Deserialize_unit_struct, Serialize_unit_struct};
use sha2::{Digest, Sha256};

use crate::model::catalogue::CandidateId;

use super::selection::{Category, Choice, CompletedBallot};
use super::token::VoteToken;

/// Length of the hash prefix shown on the kiosk receipt.
const HASH_PREVIEW_LEN: usize = 16;

/// Receipt material derived from a vote. It lets a voter recognise their
/// vote; it does not itself prevent double voting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntegrityHash(String);

impl IntegrityHash {
    /// SHA-256 over `token:candidate:...`, candidates in ascending category order.
    pub fn derive(token: &VoteToken, choices: &BTreeMap<Category, CandidateId>) -> Self {
        let mut input = token.as_str().to_string();
        for candidate in choices.values() {
            input.push(':');
            input.push_str(candidate.as_str());
        }
        Self(HEXLOWER.encode(&Sha256::digest(input.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for display, e.g. `3f2a9c0d11b4e7a8...`.
    pub fn preview(&self) -> String {
        format!("{}...", &self.0[..HASH_PREVIEW_LEN.min(self.0.len())])
    }
}

impl Display for IntegrityHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Marker for a vote that has been fully recorded.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Deserialize_unit_struct, Serialize_unit_struct)]
pub struct Completed;

/// A persisted vote. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub token: VoteToken,
    pub choices: BTreeMap<Category, CandidateId>,
    pub integrity_hash: IntegrityHash,
    pub status: Completed,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl VoteRecord {
    pub fn new(token: VoteToken, ballot: &CompletedBallot) -> Self {
        let choices = ballot.candidate_ids();
        let integrity_hash = IntegrityHash::derive(&token, &choices);
        Self {
            token,
            choices,
            integrity_hash,
            status: Completed,
            created_at: Utc::now(),
        }
    }
}

/// What the voter is shown after a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub choices: Vec<Choice>,
    pub integrity_hash: IntegrityHash,
    pub hash_preview: String,
}

impl Receipt {
    pub fn new(record: &VoteRecord, ballot: &CompletedBallot) -> Self {
        Self {
            choices: ballot.choices().cloned().collect(),
            integrity_hash: record.integrity_hash.clone(),
            hash_preview: record.integrity_hash.preview(),
        }
    }
}
