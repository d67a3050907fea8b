use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::{
    catalogue::{Candidate, Party, RegisteredVoter},
    feedback::Feedback,
    session::VoteRecord,
    store::TokenRecord,
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MongoCollection for TokenRecord {
    const NAME: &'static str = "tokens";
}

impl MongoCollection for VoteRecord {
    const NAME: &'static str = "votes";
}

impl MongoCollection for Feedback {
    const NAME: &'static str = "feedback";
}

impl MongoCollection for RegisteredVoter {
    const NAME: &'static str = "registered_voters";
}

impl MongoCollection for Party {
    const NAME: &'static str = "parties";
}

impl MongoCollection for Candidate {
    const NAME: &'static str = "candidates";
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Token collection.
    let token_index = IndexModel::builder()
        .keys(doc! {"token": 1})
        .options(unique.clone())
        .build();
    Coll::<TokenRecord>::from_db(db)
        .create_index(token_index, None)
        .await?;

    // Vote collection. This index is what makes double voting impossible.
    let vote_index = IndexModel::builder()
        .keys(doc! {"token": 1})
        .options(unique.clone())
        .build();
    Coll::<VoteRecord>::from_db(db)
        .create_index(vote_index, None)
        .await?;

    // Registered voter collection.
    let voter_index = IndexModel::builder()
        .keys(doc! {"qr_id": 1})
        .options(unique)
        .build();
    Coll::<RegisteredVoter>::from_db(db)
        .create_index(voter_index, None)
        .await?;

    Ok(())
}
