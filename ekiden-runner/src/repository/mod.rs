//! Repository layer
//!
//! Repositories abstract communication with the CI coordinator. They are
//! trait-based so the orchestration loop can be tested without network
//! access.

mod tokens;

pub use tokens::TokenProvider;
