#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

use crate::config::{ConfigFairing, DatabaseFairing};
use crate::logging::LoggerFairing;

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;

pub use config::Config;

/// Assemble the server: logging, configuration, the database connection,
/// every route, and the JSON error catcher.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .mount("/", api::routes())
        .register("/", api::catchers())
}

/// A server connected to the named database, with the example config.
#[cfg(test)]
pub(crate) async fn rocket_for_db(db_client: mongodb::Client, db_name: &str) -> Rocket<Build> {
    let db = db_client.database(db_name);
    model::mongodb::ensure_indexes_exist(&db).await.unwrap();
    rocket::build()
        .attach(LoggerFairing)
        .mount("/", api::routes())
        .register("/", api::catchers())
        .manage(Config::example())
        .manage(db_client)
        .manage(db)
}

/// Set to skip, rather than fail, database-backed tests when no database is
/// reachable.
#[cfg(test)]
pub(crate) const SKIP_DB_TESTS: &str = "BALLOT_BOX_SKIP_DB_TESTS";

/// Whether [`SKIP_DB_TESTS`] is set in the environment.
#[cfg(test)]
pub(crate) fn db_tests_skippable() -> bool {
    skip_requested(std::env::var(SKIP_DB_TESTS).ok().as_deref())
}

#[cfg(test)]
fn skip_requested(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes")
    )
}

/// A client for the configured database, checked with a ping.
#[cfg(test)]
pub(crate) async fn db_client() -> mongodb::error::Result<mongodb::Client> {
    let db_uri: String = rocket::Config::figment()
        .extract_inner("db_uri")
        .expect("`db_uri` not set");
    connect(&db_uri).await
}

#[cfg(test)]
async fn connect(db_uri: &str) -> mongodb::error::Result<mongodb::Client> {
    use mongodb::{bson::doc, options::ClientOptions};
    use std::time::Duration;

    let mut options = ClientOptions::parse(db_uri).await?;
    options.server_selection_timeout = Some(Duration::from_secs(2));
    let client = mongodb::Client::with_options(options)?;
    client
        .database("admin")
        .run_command(doc! { "ping": 1 }, None)
        .await?;
    Ok(client)
}

/// A fresh database name, so tests can run in parallel.
#[cfg(test)]
pub(crate) fn database() -> String {
    use rand::Rng;
    format!("test{}", rand::thread_rng().gen::<u32>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_tests_run_unless_skip_requested() {
        assert!(!skip_requested(None));
        assert!(!skip_requested(Some("")));
        assert!(!skip_requested(Some("0")));
        assert!(!skip_requested(Some("false")));
        assert!(skip_requested(Some("1")));
        assert!(skip_requested(Some(" TRUE ")));
        assert!(skip_requested(Some("yes")));
    }

    #[rocket::async_test]
    async fn unreachable_database_is_an_error() {
        // Nothing listens on port 1.
        assert!(connect("mongodb://127.0.0.1:1/").await.is_err());
    }
}
