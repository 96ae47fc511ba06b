//! Core domain types
//!
//! These types describe one ephemeral runner VM and the credentials it is
//! registered with. They are shared between the HTTP client (tokens) and the
//! runner (everything else).

pub mod image;
pub mod instance;
pub mod lifecycle;
pub mod token;
