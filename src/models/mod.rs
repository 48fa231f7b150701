//! # API Models
//!
//! Request and response structures for the REST API, kept separate
//! from the store records so the wire format can evolve without
//! touching the ledger.
//!
//! - `requests.rs` - Incoming request bodies
//! - `responses.rs` - Outgoing response bodies
//!
//! Everything serializes through Serde with camelCase field names for
//! JavaScript clients.

pub mod requests;
pub mod responses;

pub use requests::*;
pub use responses::*;
