use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mongodb::bson::DateTime as BsonDateTime;
use serde::Deserialize;

use crate::{
    error::{Error, Result},
    model::{
        catalogue::{Candidate, CandidateId, Party, PartyId, RegisteredVoter},
        feedback::Feedback,
        session::{Category, VoteRecord, VoteToken},
    },
};

use super::{
    Catalogue, IssuedToken, SubmitOutcome, TokenRecord, TokenStatus, TokenStore, ALREADY_VOTED,
};

/// Initial contents for an in-memory store.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub parties: Vec<Party>,
    pub candidates: Vec<Candidate>,
    pub voters: Vec<RegisteredVoter>,
    /// Unused tokens not tied to a registered voter.
    pub tokens: Vec<VoteToken>,
}

#[derive(Debug, Default)]
struct Inner {
    tokens: HashMap<VoteToken, TokenRecord>,
    votes: HashMap<VoteToken, VoteRecord>,
    feedback: Vec<Feedback>,
    voters: HashMap<String, RegisteredVoter>,
    parties: Vec<Party>,
    candidates: Vec<Candidate>,
    offline: bool,
}

/// A store held entirely in process memory. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: Seed) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.parties = seed.parties;
            inner.candidates = seed.candidates;
            for token in seed.tokens {
                inner
                    .tokens
                    .insert(token.clone(), TokenRecord::new(token, None));
            }
            // A voter's token is used iff they have voted.
            for voter in seed.voters {
                if let Some(token) = &voter.token {
                    let mut record = TokenRecord::new(token.clone(), Some(voter.qr_id.clone()));
                    if voter.has_voted {
                        record.used = true;
                        record.used_at = voter.voted_at;
                    }
                    inner.tokens.insert(token.clone(), record);
                }
                inner.voters.insert(voter.qr_id.clone(), voter);
            }
        }
        store
    }

    /// Load a JSON seed file.
    pub fn from_seed_file(path: impl AsRef<Path>) -> std::result::Result<Self, String> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        let seed = rocket::serde::json::from_str::<Seed>(&contents)
            .map_err(|e| format!("cannot parse {}: {e}", path.display()))?;
        Ok(Self::from_seed(seed))
    }

    /// Simulate losing the backend: every operation fails transiently.
    pub fn set_offline(&self, offline: bool) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .offline = offline;
    }

    pub fn vote(&self, token: &VoteToken) -> Option<VoteRecord> {
        self.raw().votes.get(token).cloned()
    }

    pub fn vote_count(&self) -> usize {
        self.raw().votes.len()
    }

    pub fn token_record(&self, token: &VoteToken) -> Option<TokenRecord> {
        self.raw().tokens.get(token).cloned()
    }

    pub fn feedback(&self) -> Vec<Feedback> {
        self.raw().feedback.clone()
    }

    pub fn registered_voter(&self, qr_id: &str) -> Option<RegisteredVoter> {
        self.raw().voters.get(qr_id).cloned()
    }

    fn raw(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        let inner = self.raw();
        if inner.offline {
            return Err(Error::Unavailable("the vote store is offline".to_string()));
        }
        Ok(inner)
    }
}

#[rocket::async_trait]
impl TokenStore for MemoryStore {
    async fn check_token(&self, token: &VoteToken) -> Result<TokenStatus> {
        let inner = self.lock()?;
        let record = inner.tokens.get(token);
        Ok(TokenStatus {
            exists: record.is_some(),
            used: record.map_or(false, |r| r.used) || inner.votes.contains_key(token),
        })
    }

    async fn issue_token(&self, qr_id: &str, fresh: VoteToken) -> Result<IssuedToken> {
        let mut inner = self.lock()?;
        let Inner {
            tokens,
            votes,
            voters,
            ..
        } = &mut *inner;

        let voter = voters
            .get_mut(qr_id)
            .ok_or_else(|| Error::not_found(format!("No registered voter with ID {qr_id}")))?;
        if voter.has_voted {
            return Err(Error::Conflict(ALREADY_VOTED.to_string()));
        }

        // A voter only ever holds one token.
        if let Some(existing) = &voter.token {
            let used = tokens.get(existing).map_or(false, |record| record.used)
                || votes.contains_key(existing);
            if used {
                return Err(Error::Conflict(ALREADY_VOTED.to_string()));
            }
            voter.verified_at = Some(BsonDateTime::now());
            tokens
                .entry(existing.clone())
                .or_insert_with(|| TokenRecord::new(existing.clone(), Some(qr_id.to_string())));
            return Ok(IssuedToken {
                token: existing.clone(),
                reused: true,
            });
        }
        voter.verified_at = Some(BsonDateTime::now());

        tokens.insert(
            fresh.clone(),
            TokenRecord::new(fresh.clone(), Some(qr_id.to_string())),
        );
        voter.token = Some(fresh.clone());
        Ok(IssuedToken {
            token: fresh,
            reused: false,
        })
    }

    async fn register_token(&self, token: &VoteToken, qr_id: Option<&str>) -> Result<()> {
        let mut inner = self.lock()?;
        inner
            .tokens
            .entry(token.clone())
            .or_insert_with(|| TokenRecord::new(token.clone(), qr_id.map(str::to_string)));
        if let Some(voter) = qr_id.and_then(|id| inner.voters.get_mut(id)) {
            voter.verified_at = Some(BsonDateTime::now());
            voter.token.get_or_insert_with(|| token.clone());
        }
        Ok(())
    }

    async fn submit_vote(&self, record: &VoteRecord) -> Result<SubmitOutcome> {
        let mut inner = self.lock()?;
        if inner.votes.contains_key(&record.token) {
            return Ok(SubmitOutcome::Conflict);
        }
        inner.votes.insert(record.token.clone(), record.clone());
        Ok(SubmitOutcome::Recorded)
    }

    async fn mark_used(&self, token: &VoteToken) -> Result<()> {
        let mut inner = self.lock()?;
        let record = inner
            .tokens
            .entry(token.clone())
            .or_insert_with(|| TokenRecord::new(token.clone(), None));
        record.used = true;
        record.used_at = Some(BsonDateTime::now());

        if let Some(voter) = inner
            .voters
            .values_mut()
            .find(|voter| voter.token.as_ref() == Some(token))
        {
            voter.has_voted = true;
            voter.voted_at = Some(BsonDateTime::now());
        }
        Ok(())
    }

    async fn submit_feedback(&self, feedback: &Feedback) -> Result<()> {
        self.lock()?.feedback.push(feedback.clone());
        Ok(())
    }
}

#[rocket::async_trait]
impl Catalogue for MemoryStore {
    async fn parties(&self) -> Result<Vec<Party>> {
        let mut parties = self.lock()?.parties.clone();
        parties.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(parties)
    }

    async fn candidates(
        &self,
        party: &PartyId,
        category: Option<&Category>,
    ) -> Result<Vec<Candidate>> {
        let mut candidates = self
            .lock()?
            .candidates
            .iter()
            .filter(|c| &c.party_id == party)
            .filter(|c| category.map_or(true, |category| &c.category == category))
            .cloned()
            .collect::<Vec<_>>();
        candidates.sort_by(|a, b| a.constituency.cmp(&b.constituency));
        Ok(candidates)
    }

    async fn candidate(&self, id: &CandidateId) -> Result<Option<Candidate>> {
        Ok(self
            .lock()?
            .candidates
            .iter()
            .find(|c| &c.id == id)
            .cloned())
    }

    async fn voter(&self, qr_id: &str) -> Result<Option<RegisteredVoter>> {
        Ok(self.lock()?.voters.get(qr_id).cloned())
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl MemoryStore {
        /// Two parties with two candidates each, token `ABC123` unused,
        /// token `USED99` used by voter `QR-2002`, and voter `QR-1001`
        /// not yet issued a token.
        pub fn example() -> Self {
            Self::from_seed(Seed {
                parties: vec![Party::example_green(), Party::example_blue()],
                candidates: Candidate::examples(),
                voters: vec![RegisteredVoter::example(), RegisteredVoter::example_voted()],
                tokens: vec![VoteToken::example()],
            })
        }
    }
}
