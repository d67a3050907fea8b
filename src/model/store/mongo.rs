use mongodb::{
    bson::{doc, DateTime as BsonDateTime, Document},
    error::Error as DbError,
    options::{FindOptions, UpdateOptions},
    Client, Database,
};
use rocket::futures::TryStreamExt;

use crate::{
    error::{Error, Result},
    model::{
        catalogue::{Candidate, CandidateId, Party, PartyId, RegisteredVoter},
        feedback::Feedback,
        mongodb::{ensure_indexes_exist, is_duplicate_key_error, Coll},
        session::{Category, VoteRecord, VoteToken},
    },
};

use super::{
    Catalogue, IssuedToken, SubmitOutcome, TokenRecord, TokenStatus, TokenStore, ALREADY_VOTED,
};

/// The production store, backed by MongoDB.
#[derive(Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    /// Connect and make sure the required indexes exist.
    pub async fn connect(db_uri: &str) -> std::result::Result<Self, DbError> {
        let client = Client::with_uri_str(db_uri).await?;
        Self::with_database(client.database(&get_database_name())).await
    }

    pub async fn with_database(db: Database) -> std::result::Result<Self, DbError> {
        ensure_indexes_exist(&db).await?;
        Ok(Self { db })
    }

    /// The voter with the given QR ID, refusing anyone who has voted.
    async fn registered_voter(&self, qr_id: &str) -> Result<RegisteredVoter> {
        let voter = self
            .voters()
            .find_one(doc! { "qr_id": qr_id }, None)
            .await?
            .ok_or_else(|| Error::not_found(format!("No registered voter with ID {qr_id}")))?;
        if voter.has_voted {
            return Err(Error::Conflict(ALREADY_VOTED.to_string()));
        }
        Ok(voter)
    }

    /// Hand back the token a voter already holds, unless it has been spent.
    async fn reuse_token(&self, qr_id: &str, existing: VoteToken) -> Result<IssuedToken> {
        let status = self.check_token(&existing).await?;
        if status.used {
            return Err(Error::Conflict(ALREADY_VOTED.to_string()));
        }
        // Restores a missing token record and stamps the verification time.
        self.register_token(&existing, Some(qr_id)).await?;
        info!("Using existing token for voter {qr_id}");
        Ok(IssuedToken {
            token: existing,
            reused: true,
        })
    }

    fn tokens(&self) -> Coll<TokenRecord> {
        Coll::from_db(&self.db)
    }

    fn votes(&self) -> Coll<VoteRecord> {
        Coll::from_db(&self.db)
    }

    fn voters(&self) -> Coll<RegisteredVoter> {
        Coll::from_db(&self.db)
    }
}

fn with_token(token: &VoteToken) -> Document {
    doc! { "token": token.as_str() }
}

/// Get the name of the database to use (production version).
#[cfg(not(test))]
fn get_database_name() -> String {
    "kiosk".to_string()
}

/// Get the name of the database to use (test version).
/// Use a random name to avoid collisions between tests.
#[cfg(test)]
fn get_database_name() -> String {
    let random: u32 = rand::random();
    let db = format!("test{random}");
    info!("Using database {db}");
    db
}

#[rocket::async_trait]
impl TokenStore for MongoStore {
    async fn check_token(&self, token: &VoteToken) -> Result<TokenStatus> {
        let record = self.tokens().find_one(with_token(token), None).await?;
        let voted = self.votes().count_documents(with_token(token), None).await? > 0;
        Ok(TokenStatus {
            exists: record.is_some(),
            used: record.map_or(false, |r| r.used) || voted,
        })
    }

    async fn issue_token(&self, qr_id: &str, fresh: VoteToken) -> Result<IssuedToken> {
        let voter = self.registered_voter(qr_id).await?;
        if let Some(existing) = voter.token {
            return self.reuse_token(qr_id, existing).await;
        }

        // Claim the voter's token slot only while it is still empty.
        let unclaimed = doc! { "qr_id": qr_id, "has_voted": false, "token": null };
        let update = doc! { "$set": { "token": fresh.as_str() } };
        let claimed = self.voters().update_one(unclaimed, update, None).await?;
        if claimed.matched_count == 0 {
            // Someone else got there first.
            let voter = self.registered_voter(qr_id).await?;
            return match voter.token {
                Some(existing) => self.reuse_token(qr_id, existing).await,
                None => Err(Error::Conflict(ALREADY_VOTED.to_string())),
            };
        }

        self.register_token(&fresh, Some(qr_id)).await?;
        info!("Issued new token for voter {qr_id}");
        Ok(IssuedToken {
            token: fresh,
            reused: false,
        })
    }

    async fn register_token(&self, token: &VoteToken, qr_id: Option<&str>) -> Result<()> {
        let record = TokenRecord::new(token.clone(), qr_id.map(str::to_string));
        match self.tokens().insert_one(record, None).await {
            Ok(_) => {}
            // Already known; never reset an existing record.
            Err(e) if is_duplicate_key_error(&e) => {}
            Err(e) => return Err(e.into()),
        }

        if let Some(qr_id) = qr_id {
            let voters = self.voters();
            voters
                .update_one(
                    doc! { "qr_id": qr_id },
                    doc! { "$set": { "verified_at": BsonDateTime::now() } },
                    None,
                )
                .await?;
            voters
                .update_one(
                    doc! { "qr_id": qr_id, "token": null },
                    doc! { "$set": { "token": token.as_str() } },
                    None,
                )
                .await?;
        }
        Ok(())
    }

    async fn submit_vote(&self, record: &VoteRecord) -> Result<SubmitOutcome> {
        match self.votes().insert_one(record, None).await {
            Ok(_) => Ok(SubmitOutcome::Recorded),
            Err(e) if is_duplicate_key_error(&e) => Ok(SubmitOutcome::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_used(&self, token: &VoteToken) -> Result<()> {
        let now = BsonDateTime::now();
        let update = doc! {
            "$set": { "used": true, "used_at": now },
            "$setOnInsert": { "qr_id": null, "created_at": now },
        };
        let upsert = UpdateOptions::builder().upsert(true).build();
        self.tokens()
            .update_one(with_token(token), update, upsert)
            .await?;

        let voted = doc! { "$set": { "has_voted": true, "voted_at": now } };
        self.voters()
            .update_one(with_token(token), voted, None)
            .await?;
        Ok(())
    }

    async fn submit_feedback(&self, feedback: &Feedback) -> Result<()> {
        Coll::<Feedback>::from_db(&self.db)
            .insert_one(feedback, None)
            .await?;
        Ok(())
    }
}

#[rocket::async_trait]
impl Catalogue for MongoStore {
    async fn parties(&self) -> Result<Vec<Party>> {
        let by_name = FindOptions::builder().sort(doc! { "name": 1 }).build();
        let parties = Coll::<Party>::from_db(&self.db)
            .find(None, by_name)
            .await?
            .try_collect()
            .await?;
        Ok(parties)
    }

    async fn candidates(
        &self,
        party: &PartyId,
        category: Option<&Category>,
    ) -> Result<Vec<Candidate>> {
        let mut filter = doc! { "party_id": party.as_str() };
        if let Some(category) = category {
            filter.insert("category", category.as_str());
        }
        let by_constituency = FindOptions::builder()
            .sort(doc! { "constituency": 1 })
            .build();
        let candidates = Coll::<Candidate>::from_db(&self.db)
            .find(filter, by_constituency)
            .await?
            .try_collect()
            .await?;
        Ok(candidates)
    }

    async fn candidate(&self, id: &CandidateId) -> Result<Option<Candidate>> {
        let candidate = Coll::<Candidate>::from_db(&self.db)
            .find_one(doc! { "_id": id.as_str() }, None)
            .await?;
        Ok(candidate)
    }

    async fn voter(&self, qr_id: &str) -> Result<Option<RegisteredVoter>> {
        Ok(self.voters().find_one(doc! { "qr_id": qr_id }, None).await?)
    }
}

/// These tests need a MongoDB server at `localhost:27017`.
#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;
    use crate::model::session::{Choice, RequiredCategories, SelectionSet};

    async fn store() -> MongoStore {
        let client = Client::with_uri_str("mongodb://localhost:27017")
            .await
            .unwrap();
        let store = MongoStore::with_database(client.database(&get_database_name()))
            .await
            .unwrap();
        store
            .voters()
            .insert_one(RegisteredVoter::example(), None)
            .await
            .unwrap();
        store
            .tokens()
            .insert_one(TokenRecord::new(VoteToken::example(), None), None)
            .await
            .unwrap();
        Coll::<Candidate>::from_db(&store.db)
            .insert_many(Candidate::examples(), None)
            .await
            .unwrap();
        store
    }

    fn record(token: VoteToken) -> VoteRecord {
        let mut selections = SelectionSet::new(RequiredCategories::example());
        selections.record_choice(Choice::example_mna()).unwrap();
        selections.record_choice(Choice::example_mpa()).unwrap();
        VoteRecord::new(token, &selections.completed().unwrap())
    }

    #[rocket::async_test]
    #[ignore = "requires a MongoDB server"]
    async fn duplicate_vote_is_conflict() {
        let store = store().await;
        assert_eq!(store.submit_vote(&record(VoteToken::example())).await.unwrap(), SubmitOutcome::Recorded);
        assert_eq!(store.submit_vote(&record(VoteToken::example())).await.unwrap(), SubmitOutcome::Conflict);
        assert!(store.check_token(&VoteToken::example()).await.unwrap().used);
        store.db.drop(None).await.unwrap();
    }

    #[rocket::async_test]
    #[ignore = "requires a MongoDB server"]
    async fn issue_then_mark_used() {
        let store = store().await;
        let issued = store
            .issue_token("QR-1001", VoteToken::mint(OsRng, 32))
            .await
            .unwrap();
        let again = store
            .issue_token("QR-1001", VoteToken::mint(OsRng, 32))
            .await
            .unwrap();
        assert!(again.reused);
        assert_eq!(issued.token, again.token);

        store.mark_used(&issued.token).await.unwrap();
        let voter = store.voter("QR-1001").await.unwrap().unwrap();
        assert!(voter.has_voted);
        assert!(matches!(
            store.issue_token("QR-1001", VoteToken::mint(OsRng, 32)).await,
            Err(Error::Conflict(_))
        ));
        store.db.drop(None).await.unwrap();
    }

    #[rocket::async_test]
    #[ignore = "requires a MongoDB server"]
    async fn issuing_refused_once_token_has_a_vote() {
        let store = store().await;
        let issued = store
            .issue_token("QR-1001", VoteToken::mint(OsRng, 32))
            .await
            .unwrap();
        assert_eq!(
            store.submit_vote(&record(issued.token.clone())).await.unwrap(),
            SubmitOutcome::Recorded
        );

        assert!(matches!(
            store.issue_token("QR-1001", VoteToken::mint(OsRng, 32)).await,
            Err(Error::Conflict(_))
        ));
        let voter = store.voter("QR-1001").await.unwrap().unwrap();
        assert_eq!(voter.token, Some(issued.token));
        store.db.drop(None).await.unwrap();
    }

    #[rocket::async_test]
    #[ignore = "requires a MongoDB server"]
    async fn candidates_filtered_by_category() {
        let store = store().await;
        let mna = Category::new("MNA");
        let candidates = store
            .candidates(&PartyId::new("p-blue"), Some(&mna))
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, CandidateId::new("cand-3"));
        store.db.drop(None).await.unwrap();
    }
}
