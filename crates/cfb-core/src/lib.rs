//! Core of the credential & feed bridge.
//!
//! This crate is framework-agnostic. The identity provider, the secondary
//! platform, the feed service and the chat network live behind ports (traits)
//! implemented in adapter crates.

pub mod cipher;
pub mod config;
pub mod directory;
pub mod domain;
pub mod errors;
pub mod feed;
pub mod logging;
pub mod mailbox;
pub mod ports;
pub mod reconcile;
pub mod relay;
pub mod token;
pub mod vault;

pub use errors::{Error, Result};
