use mongodb::{bson::doc, Client, ClientSession};
use rocket::{http::Status, serde::json::Json, Route, State};

use crate::{
    error::{Error, Result},
    model::{
        api::{
            auth::AuthToken,
            user::{AuthResponse, Credentials, Registration},
        },
        common::role::Role,
        db::{
            candidate::{NewCandidate, DEFAULT_PARTY},
            user::{NewUser, User},
            voter::NewVoter,
        },
        mongodb::{commit_or_abort, is_duplicate_key_error, retry_transient, Coll, Id},
    },
    Config,
};

pub fn routes() -> Vec<Route> {
    routes![register, login]
}

const EMAIL_TAKEN: &str = "User with this email already exists";

#[post("/auth/register", data = "<registration>", format = "json")]
pub async fn register(
    registration: Json<Registration>,
    users: Coll<User>,
    new_users: Coll<NewUser>,
    new_candidates: Coll<NewCandidate>,
    new_voters: Coll<NewVoter>,
    db_client: &State<Client>,
    config: &State<Config>,
) -> Result<(Status, Json<AuthResponse>)> {
    let new_user: NewUser = registration.0.try_into()?;

    // Advisory; the unique index on `email` decides.
    if users
        .find_one(doc! { "email": &new_user.email }, None)
        .await?
        .is_some()
    {
        return Err(Error::conflict(EMAIL_TAKEN));
    }

    // Concurrent registrations with the same email conflict inside their
    // transactions. The loser is retried and then hits the winner's `email`.
    let id = retry_transient(&format!("Registration of {}", new_user.email), || {
        create_user(db_client, &new_users, &new_candidates, &new_voters, &new_user)
    })
    .await?;
    let user = User { id, user: new_user };
    info!("Registered {} {} as {}", user.role, user.id, user.email);

    let token = AuthToken::new(&user).encode(config)?;
    let response = AuthResponse {
        message: "User registered successfully".to_string(),
        user: user.into(),
        token,
    };
    Ok((Status::Created, Json(response)))
}

/// Create the user and their role-specific record in one transaction.
async fn create_user(
    db_client: &Client,
    new_users: &Coll<NewUser>,
    new_candidates: &Coll<NewCandidate>,
    new_voters: &Coll<NewVoter>,
    new_user: &NewUser,
) -> Result<Id> {
    let mut session = db_client.start_session(None).await?;
    session.start_transaction(None).await?;

    let result = insert_user(&mut session, new_users, new_candidates, new_voters, new_user).await;
    commit_or_abort(&mut session, result).await
}

async fn insert_user(
    session: &mut ClientSession,
    new_users: &Coll<NewUser>,
    new_candidates: &Coll<NewCandidate>,
    new_voters: &Coll<NewVoter>,
    new_user: &NewUser,
) -> Result<Id> {
    let id: Id = new_users
        .insert_one_with_session(new_user, None, session)
        .await
        .map_err(|e| {
            if is_duplicate_key_error(&e) {
                Error::conflict(EMAIL_TAKEN)
            } else {
                e.into()
            }
        })?
        .inserted_id
        .as_object_id()
        .unwrap() // Valid because the ID comes directly from the DB
        .into();

    match new_user.role {
        Role::Candidate => {
            let profile = NewCandidate::new(
                new_user.name.clone(),
                DEFAULT_PARTY.to_string(),
                None,
                Some(id),
            );
            new_candidates
                .insert_one_with_session(&profile, None, session)
                .await?;
        }
        Role::Voter => {
            new_voters
                .insert_one_with_session(NewVoter::new(id), None, session)
                .await?;
        }
        Role::Admin => {}
    }

    Ok(id)
}

#[post("/auth/login", data = "<credentials>", format = "json")]
pub async fn login(
    credentials: Json<Credentials>,
    users: Coll<User>,
    config: &State<Config>,
) -> Result<Json<AuthResponse>> {
    let (email, password) = credentials.0.into_parts()?;

    let user = users
        .find_one(doc! { "email": &email }, None)
        .await?
        .filter(|user| user.verify_password(&password))
        .ok_or_else(|| {
            warn!("Failed login for {email}");
            Error::Unauthorized("Invalid email or password".to_string())
        })?;

    let token = AuthToken::new(&user).encode(config)?;
    Ok(Json(AuthResponse {
        message: "Login successful".to_string(),
        user: user.into(),
        token,
    }))
}

#[cfg(test)]
mod tests {
    use mongodb::Database;
    use rocket::{
        futures::future::join_all,
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::serde_json::{self, json},
    };

    use crate::api::test_util::{error_message, register as register_user, register_as};
    use crate::model::db::{candidate::Candidate, voter::Voter};

    use super::*;

    #[backend_test]
    async fn register_voter(client: Client, users: Coll<User>, voters: Coll<Voter>) {
        let response = register_as(&client, Role::Voter).await;
        assert_eq!(response.user.role, Role::Voter);
        assert_eq!(response.user.email, "voter@example.com");

        // The token identifies the new user.
        let config = client.rocket().state::<Config>().unwrap();
        let token = AuthToken::decode(&response.token, config).unwrap();
        assert_eq!(token.id, response.user.id);
        assert_eq!(token.role, Role::Voter);
        assert_eq!(token.name, response.user.name);

        // The password is stored hashed.
        let user = users
            .find_one(response.user.id.as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert!(user.password_hash.starts_with("$argon2"));

        // A ledger entry exists and has not voted.
        let voter = voters
            .find_one(doc! { "user_id": response.user.id }, None)
            .await
            .unwrap()
            .unwrap();
        assert!(!voter.has_voted);
    }

    #[backend_test]
    async fn register_candidate_creates_profile(client: Client, candidates: Coll<Candidate>) {
        let response = register_as(&client, Role::Candidate).await;

        let profile = candidates
            .find_one(doc! { "user_id": response.user.id }, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.name, response.user.name);
        assert_eq!(profile.party, DEFAULT_PARTY);
        assert_eq!(profile.vote_count, 0);
    }

    #[backend_test]
    async fn register_admin_creates_nothing_else(client: Client, db: Database) {
        register_as(&client, Role::Admin).await;
        let candidates = Coll::<Candidate>::from_db(&db);
        let voters = Coll::<Voter>::from_db(&db);
        assert_eq!(candidates.count_documents(None, None).await.unwrap(), 0);
        assert_eq!(voters.count_documents(None, None).await.unwrap(), 0);
    }

    #[backend_test]
    async fn duplicate_email(client: Client, users: Coll<User>) {
        register_as(&client, Role::Voter).await;

        // Same address, different case and role.
        let duplicate = Registration {
            email: Some("VOTER@example.com".to_string()),
            ..Registration::example(Role::Candidate)
        };
        let response = client
            .post(uri!(register))
            .header(ContentType::JSON)
            .body(json!(duplicate).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());
        assert_eq!(error_message(response).await, EMAIL_TAKEN);
        assert_eq!(users.count_documents(None, None).await.unwrap(), 1);
    }

    #[backend_test]
    async fn concurrent_duplicate_registrations(client: Client, users: Coll<User>, db: Database) {
        // Voters and candidates both write a second document in the transaction.
        let roles = [Role::Voter, Role::Candidate, Role::Voter, Role::Admin];
        let registrations: Vec<Registration> = roles
            .into_iter()
            .map(|role| Registration {
                email: Some("same@example.com".to_string()),
                ..Registration::example(role)
            })
            .collect();
        let attempts = registrations.iter().map(|registration| {
            client
                .post(uri!(register))
                .header(ContentType::JSON)
                .body(json!(registration).to_string())
                .dispatch()
        });
        let responses = join_all(attempts).await;

        let mut created = 0;
        for response in responses {
            match response.status() {
                status if status == Status::Created => created += 1,
                status if status == Status::Conflict => assert_eq!(error_message(response).await, EMAIL_TAKEN),
                status => panic!("Unexpected {status}"),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(users.count_documents(None, None).await.unwrap(), 1);

        // Only the winner's role record was committed.
        let candidates = Coll::<Candidate>::from_db(&db);
        let voters = Coll::<Voter>::from_db(&db);
        let role_records = candidates.count_documents(None, None).await.unwrap()
            + voters.count_documents(None, None).await.unwrap();
        assert!(role_records <= 1);
    }

    #[backend_test]
    async fn bad_registrations(client: Client, users: Coll<User>) {
        let bodies = [
            json!({}),
            json!({ "name": "A", "email": "a@example.com", "password": "longenough" }),
            json!({ "name": "A", "email": "a@example.com", "password": "longenough", "role": "root" }),
            json!({ "name": "A", "email": "a@example.com", "password": "short", "role": "voter" }),
        ];
        for body in bodies {
            let response = client
                .post(uri!(register))
                .header(ContentType::JSON)
                .body(body.to_string())
                .dispatch()
                .await;
            assert_eq!(Status::BadRequest, response.status(), "{body}");
        }
        assert_eq!(users.count_documents(None, None).await.unwrap(), 0);
    }

    #[backend_test]
    async fn login_valid(client: Client) {
        let registration = Registration::example(Role::Candidate);
        let registered = register_user(&client, &registration).await;

        let response = client
            .post(uri!(login))
            .header(ContentType::JSON)
            .body(json!(Credentials::for_registration(&registration)).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let body: AuthResponse =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(body.message, "Login successful");
        assert_eq!(body.user.id, registered.user.id);
        assert_eq!(body.user.email, registered.user.email);

        let config = client.rocket().state::<Config>().unwrap();
        assert_eq!(
            AuthToken::decode(&body.token, config).unwrap().role,
            Role::Candidate
        );
    }

    #[backend_test]
    async fn login_invalid(client: Client) {
        register_as(&client, Role::Voter).await;

        let attempts = [
            json!({ "email": "voter@example.com", "password": "wrong password" }),
            json!({ "email": "nobody@example.com", "password": "correct horse battery staple" }),
        ];
        for body in attempts {
            let response = client
                .post(uri!(login))
                .header(ContentType::JSON)
                .body(body.to_string())
                .dispatch()
                .await;
            assert_eq!(Status::Unauthorized, response.status());
            // Unknown emails and wrong passwords look the same.
            assert_eq!(error_message(response).await, "Invalid email or password");
        }

        let response = client
            .post(uri!(login))
            .header(ContentType::JSON)
            .body(json!({ "email": "voter@example.com" }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
    }
}
