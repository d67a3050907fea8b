//! Persistence for tokens, votes, feedback and the read-only catalogue.

use chrono::{DateTime, Utc};
use mongodb::bson::{serde_helpers::chrono_datetime_as_bson_datetime, DateTime as BsonDateTime};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    model::{
        catalogue::{Candidate, CandidateId, Party, PartyId, RegisteredVoter},
        feedback::Feedback,
        session::{Category, VoteRecord, VoteToken},
    },
};

mod memory;
mod mongo;

pub use memory::{MemoryStore, Seed};
pub use mongo::MongoStore;

/// What the store knows about a token.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct TokenStatus {
    pub exists: bool,
    /// Marked used, or a vote has been recorded with it.
    pub used: bool,
}

/// Result of trying to record a vote.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Recorded,
    /// A vote already exists for this token.
    Conflict,
}

/// A token handed to a registered voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub token: VoteToken,
    /// The voter already held this unused token.
    pub reused: bool,
}

/// Refusal for a voter whose token has already been spent.
pub(crate) const ALREADY_VOTED: &str = "This voter has already voted.";

/// A stored voting token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token: VoteToken,
    /// The registered voter it was issued to, if known.
    pub qr_id: Option<String>,
    pub used: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    pub used_at: Option<BsonDateTime>,
}

impl TokenRecord {
    pub fn new(token: VoteToken, qr_id: Option<String>) -> Self {
        Self {
            token,
            qr_id,
            used: false,
            created_at: Utc::now(),
            used_at: None,
        }
    }
}

#[rocket::async_trait]
pub trait TokenStore: Send + Sync {
    async fn check_token(&self, token: &VoteToken) -> Result<TokenStatus>;

    /// Issue a token to the registered voter `qr_id`, reusing their unused
    /// token if they hold one and otherwise storing `fresh`.
    ///
    /// Fails with a conflict if the voter has already voted.
    async fn issue_token(&self, qr_id: &str, fresh: VoteToken) -> Result<IssuedToken>;

    /// Adopt a token minted elsewhere (e.g. by the verification gateway).
    async fn register_token(&self, token: &VoteToken, qr_id: Option<&str>) -> Result<()>;

    /// Atomically record a vote unless one already exists for its token.
    async fn submit_vote(&self, record: &VoteRecord) -> Result<SubmitOutcome>;

    /// Flag the token, and the voter holding it, as used.
    async fn mark_used(&self, token: &VoteToken) -> Result<()>;

    async fn submit_feedback(&self, feedback: &Feedback) -> Result<()>;
}

/// Read-only election data.
#[rocket::async_trait]
pub trait Catalogue: Send + Sync {
    /// All parties, ordered by name.
    async fn parties(&self) -> Result<Vec<Party>>;

    /// Candidates of one party, ordered by constituency.
    async fn candidates(
        &self,
        party: &PartyId,
        category: Option<&Category>,
    ) -> Result<Vec<Candidate>>;

    async fn candidate(&self, id: &CandidateId) -> Result<Option<Candidate>>;

    async fn voter(&self, qr_id: &str) -> Result<Option<RegisteredVoter>>;
}

/// Which backend to use.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Mongodb,
    Memory,
}

/// Configuration for the store.
#[derive(Debug, Deserialize)]
struct StoreConfig {
    store: StoreKind,
    /// JSON file to load the in-memory store from.
    seed: Option<String>,
    // secrets
    db_uri: Option<String>,
}

/// A fairing that loads the store config, connects to the backend, performs
/// any setup necessary, and places a `TokenStore` and a `Catalogue` into
/// managed state.
pub struct StoreFairing;

#[rocket::async_trait]
impl Fairing for StoreFairing {
    fn info(&self) -> Info {
        Info {
            name: "Store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<StoreConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load store config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        match config.store {
            StoreKind::Memory => {
                warn!("Using the in-memory store; votes will not survive a restart");
                let store = match config.seed {
                    Some(path) => match MemoryStore::from_seed_file(&path) {
                        Ok(store) => store,
                        Err(e) => {
                            error!("Failed to seed in-memory store: {e}");
                            return Err(rocket);
                        }
                    },
                    None => MemoryStore::new(),
                };
                Ok(manage_store(rocket, store))
            }
            StoreKind::Mongodb => {
                let Some(db_uri) = config.db_uri else {
                    error!("`db_uri` must be set when `store = \"mongodb\"`");
                    return Err(rocket);
                };
                info!("Loaded database config, connecting...");
                match MongoStore::connect(&db_uri).await {
                    Ok(store) => {
                        info!("...database connection online!");
                        Ok(manage_store(rocket, store))
                    }
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        Err(rocket)
                    }
                }
            }
        }
    }
}

/// Place one store into managed state under both of its roles.
pub fn manage_store<S>(rocket: Rocket<Build>, store: S) -> Rocket<Build>
where
    S: TokenStore + Catalogue + Clone + 'static,
{
    let tokens: Box<dyn TokenStore> = Box::new(store.clone());
    let catalogue: Box<dyn Catalogue> = Box::new(store);
    rocket.manage(tokens).manage(catalogue)
}
