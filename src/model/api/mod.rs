//! API-compatible types.
//!
//! The types in this module are serialised in an API-friendly way, e.g.:
//!
//! - IDs are serialised as hex strings.
//! - Datetimes are serialised as ISO-8601 strings.
//! - Field names are camelCase.

pub mod auth;
pub mod candidate;
pub mod user;
pub mod voter;
