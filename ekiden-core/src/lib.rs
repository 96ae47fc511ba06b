//! Ekiden Core
//!
//! Core types shared by the Ekiden runner host.
//!
//! This crate contains:
//! - Configuration: the validated run parameters of one runner host
//! - Domain types: lifecycle states, registration tokens, image references and
//!   instance naming

pub mod config;
pub mod domain;

pub use config::{Config, ConfigError};
