use std::sync::Arc;

/// Core error type for the bridge.
///
/// Adapter crates map their specific errors into this type so callers can
/// tell an auth failure from a missing identity or a flaky network.
///
/// `Clone` so one failed refresh can be reported to every caller that waited
/// on it.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    #[error("auth error: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("incomplete credential for identity {identity_id}: missing {missing}")]
    IncompleteCredential {
        identity_id: String,
        missing: &'static str,
    },

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("provision error: {0}")]
    Provision(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[source] Arc<serde_json::Error>),

    #[error("external error: {0}")]
    External(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(Arc::new(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
