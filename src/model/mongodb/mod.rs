mod bson;
mod collection;
mod errors;
mod transaction;

pub use bson::{id_hex, option_id_hex, Id};
pub use collection::{ensure_indexes_exist, Coll, MongoCollection};
pub use errors::{is_duplicate_key_error, DUPLICATE_KEY};
pub use transaction::{commit_or_abort, retry_transient};
