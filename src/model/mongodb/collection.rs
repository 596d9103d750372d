use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use rocket::{
    request::{self, FromRequest, Request},
    State,
};

use crate::model::db::{
    candidate::{Candidate, NewCandidate},
    user::{NewUser, User},
    voter::{NewVoter, Voter},
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

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the database connection from the managed state and wrap it in a collection.
    ///
    /// Panics iff the [`Database`] is not managed by [`rocket::Rocket`].
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let db = req.guard::<&State<Database>>().await.unwrap();
        request::Outcome::Success(Coll::from_db(db))
    }
}

// User collections
const USERS: &str = "users";
impl MongoCollection for User {
    const NAME: &'static str = USERS;
}
impl MongoCollection for NewUser {
    const NAME: &'static str = USERS;
}

// Candidate collections
const CANDIDATES: &str = "candidates";
impl MongoCollection for Candidate {
    const NAME: &'static str = CANDIDATES;
}
impl MongoCollection for NewCandidate {
    const NAME: &'static str = CANDIDATES;
}

// Voter collections
const VOTERS: &str = "voters";
impl MongoCollection for Voter {
    const NAME: &'static str = VOTERS;
}
impl MongoCollection for NewVoter {
    const NAME: &'static str = VOTERS;
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent. It also creates the collections, which must
/// exist before they are written to from inside a transaction on older servers.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // User collection.
    let email_index = IndexModel::builder()
        .keys(doc! {"email": 1})
        .options(unique.clone())
        .build();
    Coll::<User>::from_db(db)
        .create_index(email_index, None)
        .await?;

    // Voter collection: one ledger entry per user.
    let voters = Coll::<Voter>::from_db(db);
    let user_index = IndexModel::builder()
        .keys(doc! {"user_id": 1})
        .options(unique.clone())
        .build();
    let has_voted_index = IndexModel::builder().keys(doc! {"has_voted": 1}).build();
    voters
        .create_indexes([user_index, has_voted_index], None)
        .await?;

    // Candidate collection: leaderboard ordering, at most one profile per owner,
    // and no two admin listings with the same name and party.
    let candidates = Coll::<Candidate>::from_db(db);
    let leaderboard_index = IndexModel::builder()
        .keys(doc! {"vote_count": -1, "name": 1})
        .build();
    let owner_options = IndexOptions::builder()
        .unique(true)
        .partial_filter_expression(doc! {"user_id": {"$type": "objectId"}})
        .build();
    let owner_index = IndexModel::builder()
        .keys(doc! {"user_id": 1})
        .options(owner_options)
        .build();
    let listing_options = IndexOptions::builder()
        .unique(true)
        .partial_filter_expression(doc! {"admin_listed": true})
        .build();
    let listing_index = IndexModel::builder()
        .keys(doc! {"name": 1, "party": 1})
        .options(listing_options)
        .build();
    candidates
        .create_indexes([leaderboard_index, owner_index, listing_index], None)
        .await?;

    Ok(())
}
