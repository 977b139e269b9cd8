//! Wiring for the credential & feed bridge: builds the core components over
//! the Keycloak, Bluesky and IRC adapters.

pub mod app;
