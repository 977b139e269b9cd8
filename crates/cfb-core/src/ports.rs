use async_trait::async_trait;

use crate::{
    domain::{
        AdminGrant, Attributes, Identity, ProvisionedAccount, SecondaryCredential, TimelinePost,
    },
    Result,
};

/// Credentials used for the admin login against the identity provider.
#[derive(Clone)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
    pub realm: String,
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("username", &self.username)
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}

/// Hexagonal port for the identity provider's admin login.
///
/// Implementations return `Error::Auth` when the provider rejects the login.
#[async_trait]
pub trait AdminLogin: Send + Sync {
    async fn login(&self, creds: &AdminCredentials) -> Result<AdminGrant>;
}

/// Hexagonal port for the identity store (read/list/update users).
///
/// Every call carries a valid admin access token; obtaining one is the
/// caller's job (see `token::TokenManager`).
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Fetch one identity. Absent identities map to `Error::NotFound`.
    async fn get(&self, access_token: &str, identity_id: &str) -> Result<Identity>;

    /// List every identity; pagination is the implementation's concern.
    async fn list_all(&self, access_token: &str) -> Result<Vec<Identity>>;

    /// Merge `attributes` into the identity's attribute map as one update.
    /// Failures map to `Error::Storage` (or `Error::NotFound`).
    async fn update_attributes(
        &self,
        access_token: &str,
        identity_id: &str,
        attributes: Attributes,
    ) -> Result<()>;
}

/// Hexagonal port for creating accounts on the secondary platform.
#[async_trait]
pub trait AccountProvisioner: Send + Sync {
    async fn create_account(&self, email: &str, password: &str) -> Result<ProvisionedAccount>;
}

/// Hexagonal port for the remote feed.
///
/// One call covers the whole refresh: log in, fetch the feed, serialize it.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_feed(&self) -> Result<Vec<u8>>;
}

/// Hexagonal port for acting as an identity on the secondary platform.
///
/// Each call logs in with the decrypted credential; sessions are not cached.
/// A rejected login maps to `Error::Auth`.
#[async_trait]
pub trait SecondaryMessaging: Send + Sync {
    /// Publish `text` addressed to `recipient` (a handle).
    async fn send_message(
        &self,
        credential: &SecondaryCredential,
        recipient: &str,
        text: &str,
    ) -> Result<()>;

    /// Newest posts on the account's home timeline, at most `limit`.
    async fn timeline(
        &self,
        credential: &SecondaryCredential,
        limit: usize,
    ) -> Result<Vec<TimelinePost>>;
}
