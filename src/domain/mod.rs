//! Domain layer types and invariants.

pub mod comments;
pub mod error;
pub mod public_id;
pub mod types;
pub mod users;
