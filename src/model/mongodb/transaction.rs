//! Retrying multi-document transactions.
//!
//! Concurrent transactions touching the same documents or index keys abort
//! with a write conflict labelled `TransientTransactionError`. The whole
//! transaction is then safe to run again, and the rerun sees whatever the
//! winner committed.

use std::future::Future;
use std::time::{Duration, Instant};

use mongodb::{
    error::{TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    ClientSession,
};
use rand::Rng;
use rocket::tokio::time::sleep;

use crate::error::{Error, Result};

/// How long a transaction that keeps hitting write conflicts is retried for.
pub const TRANSACTION_RETRY_WINDOW: Duration = Duration::from_secs(30);

/// How many times a commit with an unknown outcome is retried.
pub const MAX_COMMIT_ATTEMPTS: u32 = 4;

/// Upper bound of the random pause between conflicting attempts, in milliseconds.
const MAX_BACKOFF_MILLIS: u64 = 20;

/// Run `attempt` until it succeeds, fails with anything other than a transient
/// transaction error, or [`TRANSACTION_RETRY_WINDOW`] has passed.
///
/// Each call of `attempt` must run a complete transaction in a fresh session.
pub async fn retry_transient<T, F, Fut>(what: &str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut count = 1;
    loop {
        match attempt().await {
            Err(Error::Db(e))
                if e.contains_label(TRANSIENT_TRANSACTION_ERROR)
                    && started.elapsed() < TRANSACTION_RETRY_WINDOW =>
            {
                debug!("{what} hit a transient error on attempt {count}, retrying: {e}");
                count += 1;
                let pause = rand::thread_rng().gen_range(1..=MAX_BACKOFF_MILLIS);
                sleep(Duration::from_millis(pause)).await;
            }
            result => return result,
        }
    }
}

/// Finish the session's transaction: commit if `result` is a success,
/// otherwise abort and pass the error on.
pub async fn commit_or_abort<T>(session: &mut ClientSession, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            commit_with_retry(session).await?;
            Ok(value)
        }
        Err(e) => {
            // A failed write may already have aborted the transaction server-side.
            if let Err(abort_err) = session.abort_transaction().await {
                debug!("Abort after failed transaction returned: {abort_err}");
            }
            Err(e)
        }
    }
}

/// Commit, retrying while the server reports the outcome as unknown.
async fn commit_with_retry(session: &mut ClientSession) -> Result<()> {
    let mut attempt = 1;
    loop {
        match session.commit_transaction().await {
            Ok(()) => return Ok(()),
            Err(e)
                if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                    && attempt < MAX_COMMIT_ATTEMPTS =>
            {
                warn!("Commit outcome unknown on attempt {attempt}, retrying: {e}");
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[rocket::async_test]
    async fn success_returned_at_once() {
        let calls = Cell::new(0);
        let result = retry_transient("test", || {
            calls.set(calls.get() + 1);
            async { Ok(7) }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 1);
    }

    #[rocket::async_test]
    async fn other_errors_not_retried() {
        let calls = Cell::new(0);
        let result: Result<()> = retry_transient("test", || {
            calls.set(calls.get() + 1);
            async { Err(Error::conflict("taken")) }
        })
        .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(calls.get(), 1);
    }
}
